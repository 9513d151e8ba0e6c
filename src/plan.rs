//! Derivative set planning.
//!
//! Turns the configured `max` and `sizes` requests into the concrete list of
//! rendition sizes for one source image. The plan is a pure function of the
//! settings and the source dimensions: planning twice gives the same result.
//!
//! Sizes are deduplicated and sorted by width alone, as in an IIIF `sizes`
//! list. When two requests resolve to the same width, the first one wins and
//! its height is kept. The `max` request counts as first.

use crate::config::StaticSettings;
use crate::iiif::{MalformedSizeRequest, Size, SizeRequest};
use tracing::warn;

/// The resolved sizes to materialize for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivativePlan {
    /// Full source dimensions.
    pub actual: Size,
    /// Resolved `max` request, written to `full/max/0/`.
    pub max: Option<Size>,
    /// Ascending by width, no duplicate widths. Includes `max`.
    pub sizes: Vec<Size>,
    /// Last of `sizes`, or `actual` when `sizes` is empty.
    pub largest: Size,
    /// Requests that did not parse and were skipped.
    pub rejected: Vec<MalformedSizeRequest>,
}

impl DerivativePlan {
    fn from_parts(
        actual: Size,
        max: Option<Size>,
        mut sizes: Vec<Size>,
        rejected: Vec<MalformedSizeRequest>,
    ) -> Self {
        sizes.sort_by_key(|s| s.width);
        let largest = sizes.last().copied().unwrap_or(actual);
        Self {
            actual,
            max,
            sizes,
            largest,
            rejected,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// A copy restricted to the sizes that were actually produced.
    ///
    /// `largest` is recomputed from what remains; `max` survives only if
    /// `max_produced` is true.
    pub fn restricted_to(&self, produced: &[Size], max_produced: bool) -> DerivativePlan {
        let sizes = self
            .sizes
            .iter()
            .copied()
            .filter(|s| produced.contains(s))
            .collect();
        DerivativePlan::from_parts(
            self.actual,
            self.max.filter(|_| max_produced),
            sizes,
            self.rejected.clone(),
        )
    }
}

/// Resolve one request, clamping to the source when upscaling is off and the
/// request does not carry `^`.
fn resolve_request(
    request: &str,
    actual: Size,
    allow_upscale: bool,
) -> Result<Size, MalformedSizeRequest> {
    let parsed: SizeRequest = request.parse()?;
    let size = parsed.resolve(actual);
    if allow_upscale || parsed.upscale {
        Ok(size)
    } else {
        Ok(size.clamp_within(actual))
    }
}

fn push_unique_width(sizes: &mut Vec<Size>, size: Size) {
    if !sizes.iter().any(|s| s.width == size.width) {
        sizes.push(size);
    }
}

/// Plan the renditions for a source of size `actual`.
///
/// Malformed requests are logged and skipped; they never fail the plan.
pub fn plan(settings: &StaticSettings, actual: Size) -> DerivativePlan {
    let mut sizes = Vec::with_capacity(settings.sizes.len() + 1);
    let mut rejected = Vec::new();

    let max = match settings.max_request() {
        Some(request) => match resolve_request(request, actual, settings.allow_upscale) {
            Ok(size) => {
                sizes.push(size);
                Some(size)
            }
            Err(e) => {
                warn!(request, "skipping max: {e}");
                rejected.push(e);
                None
            }
        },
        None => None,
    };

    for request in &settings.sizes {
        match resolve_request(request, actual, settings.allow_upscale) {
            Ok(size) => push_unique_width(&mut sizes, size),
            Err(e) => {
                warn!(request = %request, "skipping size: {e}");
                rejected.push(e);
            }
        }
    }

    DerivativePlan::from_parts(actual, max, sizes, rejected)
}
