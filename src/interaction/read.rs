use anyhow::Result;

use super::RequestPath;
use crate::clusters::ClusterContext;
use crate::tlv::Tag;

const TAG_READ_ATTRIBUTE_REQUESTS: u8 = 0;

const TAG_REPORT_SUBSCRIPTION_ID: u8 = 0;
const TAG_REPORT_ATTRIBUTE_REPORTS: u8 = 1;
const TAG_REPORT_SUPPRESS_RESPONSE: u8 = 4;

/// ReportData {0: subscription id (optional), 1: [AttributeReportIB], 4: suppress response}
pub(crate) fn encode_report_data(
    ctx: &ClusterContext,
    subscription_id: Option<u32>,
    paths: &[RequestPath],
    suppress_response: bool,
) -> Result<Vec<u8>> {
    let mut tlv = super::response_writer();
    tlv.start_struct(Tag::Anonymous)?;
    if let Some(id) = subscription_id {
        tlv.write_uint(TAG_REPORT_SUBSCRIPTION_ID, id as u64)?;
    }
    tlv.start_array(TAG_REPORT_ATTRIBUTE_REPORTS)?;
    for p in paths {
        super::encode_attribute_report(&mut tlv, ctx, p)?;
    }
    tlv.end_container()?;
    if suppress_response {
        tlv.write_bool(TAG_REPORT_SUPPRESS_RESPONSE, true)?;
    }
    tlv.end_container()?;
    Ok(tlv.into_vec())
}

/// Answer ReadRequest with ReportData. Each requested path yields either data or status.
pub fn handle_read_request(ctx: &ClusterContext, payload: &[u8]) -> Result<Vec<u8>> {
    let request = super::decode_request(payload)?;
    let paths = super::request_paths(&request, TAG_READ_ATTRIBUTE_REQUESTS);
    log::debug!("read request with {} paths", paths.len());
    encode_report_data(ctx, None, &paths, true)
}
