use anyhow::Result;

use super::subscribe::Subscription;
use crate::clusters::ClusterContext;

/// Encoded ReportData waiting to be sent on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReport {
    pub session_id: u16,
    pub subscription_id: u32,
    pub payload: Vec<u8>,
}

/// ReportData for one subscription: {0: subscription id, 1: [AttributeReportIB]}.
pub fn encode_subscription_report(ctx: &ClusterContext, sub: &Subscription) -> Result<Vec<u8>> {
    super::read::encode_report_data(ctx, Some(sub.subscription_id), &[sub.path.into()], false)
}

/// Encode reports for all fired subscriptions. Failures are logged and skipped.
pub fn generate_reports(ctx: &ClusterContext, fired: &[Subscription]) -> Vec<PendingReport> {
    fired
        .iter()
        .filter_map(|sub| match encode_subscription_report(ctx, sub) {
            Ok(payload) => Some(PendingReport {
                session_id: sub.session_id,
                subscription_id: sub.subscription_id,
                payload,
            }),
            Err(e) => {
                log::error!("can't encode report for subscription {}: {:#}", sub.subscription_id, e);
                None
            }
        })
        .collect()
}
