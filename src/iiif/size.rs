//! IIIF Image API size parameters.
//!
//! A size request is the `{size}` segment of an Image API URL. This module
//! parses it and resolves it against the full dimensions of a source image:
//!
//! | Request | Result for a 3000×2000 source |
//! |---|---|
//! | `max`, `full` | 3000×2000 |
//! | `500,` | 500×333 (height follows the aspect ratio) |
//! | `,500` | 750×500 (width follows the aspect ratio) |
//! | `500,500` | 500×500 (forced, aspect ratio not preserved) |
//! | `!100,100` | 100×67 (best fit inside the box) |
//! | `pct:10` | 300×200 |
//!
//! Any of the above may carry the Image API 3 `^` prefix. Resolution itself
//! never refuses to upscale; the `^` marker is kept on [`SizeRequest`] so
//! callers that want the "no upscale" restriction can apply it.
//!
//! Fractional results are rounded to the nearest pixel, never below 1.

use nom::{
    Finish, IResult, Parser,
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit0, digit1},
    combinator::{all_consuming, map, map_res, opt, recognize, value, verify},
    sequence::{preceded, separated_pair, terminated},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed IIIF size request: {0:?}")]
pub struct MalformedSizeRequest(pub String);

/// Pixel dimensions of an image or rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either dimension is larger than the same dimension of `other`.
    pub fn exceeds(self, other: Size) -> bool {
        self.width > other.width || self.height > other.height
    }

    /// Shrink to fit inside `bounds`, keeping this size's own aspect ratio.
    /// Sizes that already fit are returned unchanged.
    pub fn clamp_within(self, bounds: Size) -> Size {
        if !self.exceeds(bounds) {
            return self;
        }
        best_fit(self, bounds.width, bounds.height)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.width, self.height)
    }
}

/// A parsed size request.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeRequest {
    /// The request carried the `^` prefix.
    pub upscale: bool,
    pub kind: SizeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizeKind {
    Max,
    Width(NonZeroU32),
    Height(NonZeroU32),
    Exact { w: NonZeroU32, h: NonZeroU32 },
    BestFit { w: NonZeroU32, h: NonZeroU32 },
    Percent(f64),
}

impl SizeRequest {
    /// Compute the target dimensions for a source of size `actual`.
    pub fn resolve(&self, actual: Size) -> Size {
        match self.kind {
            SizeKind::Max => actual,
            SizeKind::Width(w) => {
                let w = w.get();
                Size::new(w, scale(actual.height, w, actual.width))
            }
            SizeKind::Height(h) => {
                let h = h.get();
                Size::new(scale(actual.width, h, actual.height), h)
            }
            SizeKind::Exact { w, h } => Size::new(w.get(), h.get()),
            SizeKind::BestFit { w, h } => best_fit(actual, w.get(), h.get()),
            SizeKind::Percent(pct) => Size::new(
                round_px(f64::from(actual.width) * pct / 100.0),
                round_px(f64::from(actual.height) * pct / 100.0),
            ),
        }
    }
}

impl FromStr for SizeRequest {
    type Err = MalformedSizeRequest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size_request(s.trim())
            .finish()
            .map(|(_, request)| request)
            .map_err(|_| MalformedSizeRequest(s.to_string()))
    }
}

/// Parse `request` and resolve it against `actual`.
pub fn resolve(request: &str, actual: Size) -> Result<Size, MalformedSizeRequest> {
    Ok(request.parse::<SizeRequest>()?.resolve(actual))
}

fn round_px(value: f64) -> u32 {
    (value.round() as u32).max(1)
}

/// `value * num / den`, rounded.
fn scale(value: u32, num: u32, den: u32) -> u32 {
    round_px(f64::from(value) * f64::from(num) / f64::from(den))
}

/// Largest size with the aspect ratio of `source` that fits in `w`×`h`.
/// The limiting dimension is always exactly equal to its bound.
fn best_fit(source: Size, w: u32, h: u32) -> Size {
    let width_ratio = f64::from(w) / f64::from(source.width);
    let height_ratio = f64::from(h) / f64::from(source.height);
    if width_ratio <= height_ratio {
        Size::new(w, scale(source.height, w, source.width))
    } else {
        Size::new(scale(source.width, h, source.height), h)
    }
}

// =============================================================================
// Grammar
// =============================================================================

/// Parse from text a floating point number that disallows Inf, NaN, e and
/// negatives
fn parse_iiif_float(input: &str) -> IResult<&str, f64> {
    map_res(
        alt((
            recognize((digit0, char('.'), digit1)),
            recognize(digit1::<&str, _>),
        )),
        str::parse,
    )
    .parse(input)
}

fn parse_nonzerou32(input: &str) -> IResult<&str, NonZeroU32> {
    map_res(map_res(digit1, str::parse::<u32>), NonZeroU32::try_from).parse(input)
}

fn parse_size_kind(input: &str) -> IResult<&str, SizeKind> {
    alt((
        value(SizeKind::Max, alt((tag("max"), tag("full")))),
        map(
            preceded(
                tag("pct:"),
                verify(parse_iiif_float, |pct: &f64| *pct > 0.0),
            ),
            SizeKind::Percent,
        ),
        map(
            preceded(
                char('!'),
                separated_pair(parse_nonzerou32, char(','), parse_nonzerou32),
            ),
            |(w, h)| SizeKind::BestFit { w, h },
        ),
        map(
            separated_pair(parse_nonzerou32, char(','), parse_nonzerou32),
            |(w, h)| SizeKind::Exact { w, h },
        ),
        map(terminated(parse_nonzerou32, char(',')), SizeKind::Width),
        map(preceded(char(','), parse_nonzerou32), SizeKind::Height),
    ))
    .parse(input)
}

fn parse_size_request(input: &str) -> IResult<&str, SizeRequest> {
    let (i, upscale) = map(opt(char('^')), |u| u.is_some()).parse(input)?;
    let (i, kind) = all_consuming(parse_size_kind).parse(i)?;
    Ok((i, SizeRequest { upscale, kind }))
}
