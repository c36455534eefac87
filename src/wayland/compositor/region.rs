use tracing::trace;

use super::{HostRegionId, ProxyContext};

/// Requests of a client `wl_region`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionRequest {
    /// Add a rectangle
    Add {
        /// Left edge
        x: i32,
        /// Top edge
        y: i32,
        /// Width
        width: i32,
        /// Height
        height: i32,
    },
    /// Subtract a rectangle
    Subtract {
        /// Left edge
        x: i32,
        /// Top edge
        y: i32,
        /// Width
        width: i32,
        /// Height
        height: i32,
    },
}

/// Forward a region request to the host
///
/// Regions are not tied to a surface when they are built, so surface specific scales do not
/// apply. Both corners are translated, the host rectangle spans between them.
pub(crate) fn forward(ctx: &mut ProxyContext, region: HostRegionId, request: RegionRequest) {
    let (x, y, width, height) = match request {
        RegionRequest::Add { x, y, width, height } | RegionRequest::Subtract { x, y, width, height } => {
            (x, y, width, height)
        }
    };
    let top_left = ctx.transform.guest_to_host(None, (x, y).into());
    let bottom_right = ctx
        .transform
        .guest_to_host(None, (x.saturating_add(width), y.saturating_add(height)).into());
    let (x, y) = (top_left.x, top_left.y);
    let (width, height) = (bottom_right.x - x, bottom_right.y - y);

    trace!(?region, ?request, "Forwarding region request");
    match request {
        RegionRequest::Add { .. } => ctx.host.region_add(region, x, y, width, height),
        RegionRequest::Subtract { .. } => ctx.host.region_subtract(region, x, y, width, height),
    }
}
