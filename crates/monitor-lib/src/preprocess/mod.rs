//! Traceroute preprocessing
//!
//! Reduces a raw multi-hop sample to one network-entry observation: the
//! latency of the last router inside the destination's AS, and the neighbor
//! AS through which traffic entered it.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use crate::error::PreprocessingError;
use crate::models::{AsNumber, EntryObservation, HopRecord, RawHop, RawSample};
use crate::resolver::AsResolver;

/// Boundary located by the farthest-to-nearest hop walk
#[derive(Debug, Clone, PartialEq)]
pub struct EntryHop {
    /// Address of the first router outside the destination AS
    pub ip: String,
    /// AS of that router, `None` if it could not be resolved
    pub asn: Option<AsNumber>,
    /// Min RTT of the last router inside the destination AS, infinite if none responded
    pub rtt: f64,
}

/// Collapse each raw hop to its fastest reply
///
/// Hops that report an error, or whose packets all timed out, become
/// `HopRecord::no_response`.
pub fn clean_hops(hops: &[RawHop]) -> Vec<HopRecord> {
    hops.iter()
        .map(|raw| {
            if raw.error.is_some() {
                return HopRecord::no_response(raw.hop);
            }

            let fastest = raw
                .replies
                .iter()
                .filter_map(|reply| reply.rtt.filter(|rtt| rtt.is_finite()).map(|rtt| (rtt, reply)))
                .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            match fastest {
                Some((rtt, reply)) => HopRecord {
                    hop: raw.hop,
                    ip: reply.from.clone(),
                    min_rtt: Some(rtt),
                },
                None => HopRecord::no_response(raw.hop),
            }
        })
        .collect()
}

/// Walk hops farthest to nearest and find the first router outside `destination_as`
///
/// `as_of` maps a hop address to its AS. Hops without an address are skipped:
/// they never form the boundary and their RTT is never used. A hop whose AS
/// cannot be resolved counts as outside the destination AS.
pub fn find_entry_hop<F>(hops: &[HopRecord], destination_as: AsNumber, mut as_of: F) -> Option<EntryHop>
where
    F: FnMut(&str) -> Option<AsNumber>,
{
    let mut last_inside: Option<f64> = None;

    for hop in hops.iter().rev() {
        let Some(ip) = hop.ip.as_deref() else {
            continue;
        };

        let asn = as_of(ip);
        if asn != Some(destination_as) {
            return Some(EntryHop {
                ip: ip.to_string(),
                asn,
                rtt: last_inside.unwrap_or(f64::INFINITY),
            });
        }
        last_inside = hop.min_rtt;
    }

    None
}

/// Turns raw samples into entry observations using an AS resolver
#[derive(Clone)]
pub struct Preprocessor {
    resolver: Arc<dyn AsResolver>,
}

impl Preprocessor {
    pub fn new(resolver: Arc<dyn AsResolver>) -> Self {
        Self { resolver }
    }

    pub async fn preprocess(&self, sample: &RawSample) -> Result<EntryObservation, PreprocessingError> {
        let destination = sample
            .dst_addr
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| PreprocessingError::Malformed {
                probe_id: sample.probe_id,
                reason: "missing destination address".to_string(),
            })?;

        if sample.hops.is_empty() {
            return Err(PreprocessingError::Malformed {
                probe_id: sample.probe_id,
                reason: "no hops".to_string(),
            });
        }

        let hops = clean_hops(&sample.hops);

        let destination_as = self.lookup(destination).await?.ok_or_else(|| {
            PreprocessingError::UnresolvedDestination {
                address: destination.to_string(),
            }
        })?;

        // Resolve in walk order, stopping at the first address outside the destination AS
        let mut resolved: HashMap<&str, Option<AsNumber>> = HashMap::new();
        for ip in hops.iter().rev().filter_map(|h| h.ip.as_deref()) {
            if resolved.contains_key(ip) {
                continue;
            }
            let asn = self.lookup(ip).await?;
            resolved.insert(ip, asn);
            if asn != Some(destination_as) {
                break;
            }
        }

        let entry = find_entry_hop(&hops, destination_as, |ip| {
            resolved.get(ip).copied().flatten()
        });

        let observation = match entry {
            Some(entry) => EntryObservation::entry(
                sample.probe_id,
                sample.timestamp,
                Some(entry.rtt),
                Some(entry.ip),
                entry.asn,
            ),
            None => EntryObservation::unknown(sample.probe_id, sample.timestamp),
        };

        trace!(
            probe_id = sample.probe_id,
            timestamp = sample.timestamp,
            entry_as = ?observation.entry_as,
            entry_rtt = ?observation.entry_rtt,
            "Preprocessed sample"
        );

        Ok(observation)
    }

    /// A failed lookup drops the sample; only a definite "no AS" answer counts as a boundary
    async fn lookup(&self, ip: &str) -> Result<Option<AsNumber>, PreprocessingError> {
        self.resolver
            .lookup(ip)
            .await
            .map_err(|e| PreprocessingError::Lookup {
                address: ip.to_string(),
                reason: e.to_string(),
            })
    }
}
