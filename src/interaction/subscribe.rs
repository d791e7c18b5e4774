use anyhow::{Context, Result};

use super::{RequestPath, StatusCode};
use crate::attributes::AttributePath;
use crate::tlv::Tag;

pub const MAX_SUBSCRIPTIONS: usize = 10;
pub const DEFAULT_MIN_INTERVAL: u16 = 1;
pub const DEFAULT_MAX_INTERVAL: u16 = 10;

const TAG_KEEP_SUBSCRIPTIONS: u8 = 0;
const TAG_MIN_INTERVAL_FLOOR: u8 = 1;
const TAG_MAX_INTERVAL_CEILING: u8 = 2;
const TAG_ATTRIBUTE_REQUESTS: u8 = 3;

const TAG_RESPONSE_SUBSCRIPTION_ID: u8 = 0;
const TAG_RESPONSE_MAX_INTERVAL: u8 = 2;

/// Times are seconds on the coordinator's monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub session_id: u16,
    pub subscription_id: u32,
    pub path: AttributePath,
    pub min_interval: u16,
    pub max_interval: u16,
    pub last_report: u64,
}

pub struct SubscriptionManager {
    slots: [Option<Subscription>; MAX_SUBSCRIPTIONS],
    next_id: u32,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            slots: [None; MAX_SUBSCRIPTIONS],
            next_id: 1,
        }
    }

    pub fn add(
        &mut self,
        session_id: u16,
        path: AttributePath,
        min_interval: u16,
        max_interval: u16,
        now: u64,
    ) -> Result<u32> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .context("subscription table full")?;
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        *slot = Some(Subscription {
            session_id,
            subscription_id: id,
            path,
            min_interval,
            max_interval,
            last_report: now,
        });
        log::debug!(
            "subscription {} session {} path {} interval {}..{}",
            id,
            session_id,
            path,
            min_interval,
            max_interval
        );
        Ok(id)
    }

    /// Returns true when subscription existed for that session.
    pub fn remove(&mut self, session_id: u16, subscription_id: u32) -> bool {
        for slot in self.slots.iter_mut() {
            if slot
                .is_some_and(|s| s.session_id == session_id && s.subscription_id == subscription_id)
            {
                *slot = None;
                return true;
            }
        }
        false
    }

    pub fn remove_all_for_session(&mut self, session_id: u16) -> usize {
        let mut removed = 0;
        for slot in self.slots.iter_mut() {
            if slot.is_some_and(|s| s.session_id == session_id) {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    pub fn get(&self, subscription_id: u32) -> Option<&Subscription> {
        self.slots
            .iter()
            .flatten()
            .find(|s| s.subscription_id == subscription_id)
    }

    pub fn count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Subscriptions whose max interval elapsed. Their report time is reset to `now`.
    pub fn check_intervals(&mut self, now: u64) -> Vec<Subscription> {
        let mut due = Vec::new();
        for s in self.slots.iter_mut().flatten() {
            if now.saturating_sub(s.last_report) >= s.max_interval as u64 {
                s.last_report = now;
                due.push(*s);
            }
        }
        due
    }

    /// Subscriptions on `path` outside their min interval. Their report time is reset to `now`.
    pub fn notify_change(&mut self, path: &AttributePath, now: u64) -> Vec<Subscription> {
        let mut due = Vec::new();
        for s in self.slots.iter_mut().flatten() {
            if s.path == *path && now.saturating_sub(s.last_report) >= s.min_interval as u64 {
                s.last_report = now;
                due.push(*s);
            }
        }
        due
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle SubscribeRequest, returns SubscribeResponse {0: first subscription id, 2: max interval}.
pub fn handle_subscribe_request(
    manager: &mut SubscriptionManager,
    session_id: u16,
    payload: &[u8],
    now: u64,
) -> Result<Vec<u8>> {
    let request = super::decode_request(payload)?;
    let keep = request.get_bool(&[TAG_KEEP_SUBSCRIPTIONS]).unwrap_or(false);
    let min_interval = request
        .get_u16(&[TAG_MIN_INTERVAL_FLOOR])
        .unwrap_or(DEFAULT_MIN_INTERVAL);
    let max_interval = request
        .get_u16(&[TAG_MAX_INTERVAL_CEILING])
        .unwrap_or(DEFAULT_MAX_INTERVAL);
    if min_interval > max_interval {
        log::debug!(
            "subscribe rejected, min interval {} above max {}",
            min_interval,
            max_interval
        );
        return Err(StatusCode::InvalidAction.into());
    }
    // zero would report on every poll
    let max_interval = max_interval.max(1);
    let paths = super::request_paths(&request, TAG_ATTRIBUTE_REQUESTS);

    if !keep {
        let removed = manager.remove_all_for_session(session_id);
        if removed > 0 {
            log::debug!("dropped {} subscriptions of session {}", removed, session_id);
        }
    }

    let mut first_id = None;
    for p in paths.iter().filter_map(RequestPath::concrete) {
        match manager.add(session_id, p, min_interval, max_interval, now) {
            Ok(id) => {
                first_id.get_or_insert(id);
            }
            Err(e) => {
                log::warn!("{:#}, path {} not subscribed", e, p);
                break;
            }
        }
    }
    let Some(first_id) = first_id else {
        anyhow::bail!("no subscription created");
    };

    let mut tlv = super::response_writer();
    tlv.start_struct(Tag::Anonymous)?;
    tlv.write_uint(TAG_RESPONSE_SUBSCRIPTION_ID, first_id as u64)?;
    tlv.write_uint(TAG_RESPONSE_MAX_INTERVAL, max_interval as u64)?;
    tlv.end_container()?;
    Ok(tlv.into_vec())
}
