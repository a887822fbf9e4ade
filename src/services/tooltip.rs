use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{Hint, HintPosition};

/// Distance kept between the tooltip and the viewport edge, in pixels.
const EDGE_MARGIN: f64 = 10.0;
/// Gap between the tooltip and the element it annotates, in pixels.
const TARGET_GAP: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Measured bounds of the annotated element, in viewport coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Placement {
    pub top: f64,
    pub left: f64,
}

/// Computes where to draw a hint's tooltip.
///
/// Side placements sit adjacent to the target with a fixed gap, centered
/// along the other axis, then shifted by the hint's offsets. The result is
/// clamped so the tooltip stays inside the viewport with a margin on every
/// edge. A hint whose target was not measured falls back to dead center.
pub fn place_hint(hint: &Hint, viewport: Size, tooltip: Size, target: Option<Rect>) -> Placement {
    let base = match target {
        _ if hint.is_centered() => centered(viewport, tooltip),
        Some(target) => beside_target(hint.position, target, tooltip),
        None => {
            warn!(
                target = %hint.target,
                "Hint target was not measured; centering the tooltip"
            );
            centered(viewport, tooltip)
        }
    };

    let left = base.left + hint.offset_x;
    let top = base.top + hint.offset_y;

    Placement {
        top: clamp_axis(top, viewport.height, tooltip.height),
        left: clamp_axis(left, viewport.width, tooltip.width),
    }
}

fn centered(viewport: Size, tooltip: Size) -> Placement {
    Placement {
        top: viewport.height / 2.0 - tooltip.height / 2.0,
        left: viewport.width / 2.0 - tooltip.width / 2.0,
    }
}

fn beside_target(position: HintPosition, target: Rect, tooltip: Size) -> Placement {
    let centered_left = target.x + target.width / 2.0 - tooltip.width / 2.0;
    let centered_top = target.y + target.height / 2.0 - tooltip.height / 2.0;

    match position {
        HintPosition::Top => Placement {
            top: target.y - tooltip.height - TARGET_GAP,
            left: centered_left,
        },
        HintPosition::Bottom => Placement {
            top: target.y + target.height + TARGET_GAP,
            left: centered_left,
        },
        HintPosition::Left => Placement {
            top: centered_top,
            left: target.x - tooltip.width - TARGET_GAP,
        },
        HintPosition::Right => Placement {
            top: centered_top,
            left: target.x + target.width + TARGET_GAP,
        },
        // Centered hints never reach here; treat the target box itself as
        // the anchor if one ever does.
        HintPosition::Center => Placement {
            top: centered_top,
            left: centered_left,
        },
    }
}

// min before max so a viewport smaller than the tooltip pins to the margin
// instead of panicking.
fn clamp_axis(value: f64, viewport_extent: f64, tooltip_extent: f64) -> f64 {
    value
        .min(viewport_extent - tooltip_extent - EDGE_MARGIN)
        .max(EDGE_MARGIN)
}
