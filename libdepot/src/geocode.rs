//! Address geocoding as an injected capability.
//!
//! A failed lookup is an explicit [`Geocoded::Failed`] value. It is never
//! collapsed into a placeholder coordinate: in a request it becomes a
//! missing (`null`) coordinate, which validation rejects.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::GeoPoint;

pub trait GeocodingProvider: Sync {
    /// Looks up a free-text address. `Ok(None)` means the provider answered
    /// but found nothing.
    fn geocode(&self, address: &str, timeout: Duration) -> Result<Option<GeoPoint>>;
}

impl<F: Fn(&str, Duration) -> Result<Option<GeoPoint>> + Sync> GeocodingProvider for F {
    fn geocode(&self, address: &str, timeout: Duration) -> Result<Option<GeoPoint>> {
        self(address, timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Geocoded {
    Found(GeoPoint),
    Failed { reason: String },
}

impl Geocoded {
    pub fn point(&self) -> Option<GeoPoint> {
        match self {
            Geocoded::Found(p) => Some(*p),
            Geocoded::Failed { .. } => None,
        }
    }

    /// The `[lat, lon]` request form, `None` for a failed lookup.
    pub fn as_coord(&self) -> Option<[f64; 2]> {
        self.point().map(|p| [p.latitude, p.longitude])
    }
}

/// Geocodes every address, fanning the lookups out over `threads` workers.
/// Results come back in input order.
pub fn geocode_all(
    provider: &dyn GeocodingProvider,
    addresses: &[String],
    timeout: Duration,
    threads: usize,
) -> Vec<Geocoded> {
    let threads = threads.clamp(1, addresses.len().max(1));
    let lookup = |address: &str| -> Geocoded {
        let started = Instant::now();
        let answer = provider.geocode(address, timeout);
        if started.elapsed() > timeout {
            log::warn!("geocoder answered {address:?} after its {timeout:?} deadline");
            return Geocoded::Failed {
                reason: Error::ProviderTimeout(timeout).to_string(),
            };
        }
        match answer {
            Ok(Some(p)) if p.is_valid() => Geocoded::Found(p),
            Ok(Some(p)) => {
                log::warn!("geocoder returned an out-of-range point for {address:?}: {p:?}");
                Geocoded::Failed {
                    reason: "coordinate out of range".to_string(),
                }
            }
            Ok(None) => {
                log::warn!("address not found: {address:?}");
                Geocoded::Failed {
                    reason: "address not found".to_string(),
                }
            }
            Err(e) => {
                log::warn!("geocoding failed for {address:?}: {e}");
                Geocoded::Failed {
                    reason: e.to_string(),
                }
            }
        }
    };

    let mut out: Vec<Option<Geocoded>> = vec![None; addresses.len()];
    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for worker in 0..threads {
            let lookup = &lookup;
            let h = scope.spawn(move || {
                (worker..addresses.len())
                    .step_by(threads)
                    .map(|i| (i, lookup(&addresses[i])))
                    .collect::<Vec<_>>()
            });
            handles.push(h);
        }
        for h in handles {
            match h.join() {
                Ok(done) => {
                    for (i, result) in done {
                        out[i] = Some(result);
                    }
                }
                Err(_) => log::error!("geocoding worker panicked"),
            }
        }
    });

    out.into_iter()
        .map(|r| {
            r.unwrap_or_else(|| Geocoded::Failed {
                reason: "lookup did not complete".to_string(),
            })
        })
        .collect()
}
