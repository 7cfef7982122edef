// THEORY:
// The `occupancy` module turns a binary worm mask plus one circular region
// into a single number: the fraction of in-region pixels the isolation
// stage classified as worm. It is a pure function of its inputs and holds
// no state.
//
// The scan walks the circle's bounding box, clipped to
// `[0, height-1) x [0, width-1)`. The open upper bound excludes the last
// row and column of the frame from every region; downstream calibration
// depends on that boundary, so it is pinned by a test rather than silently
// "fixed". Membership uses squared distances, so no square roots are taken.

use crate::core_modules::region::{Point, RegionPair};
use crate::error::OccupancyError;

/// Occupancy ratio of one circular region against a mask.
///
/// Returns `DegenerateRegion` when the clipped footprint contains zero
/// pixels (the circle sits entirely off-frame or in the excluded border),
/// never dividing by zero.
pub fn occupancy(
    mask: &[u8],
    width: u32,
    height: u32,
    center: Point,
    radius: i32,
) -> Result<f64, OccupancyError> {
    let (w, h) = (width as i32, height as i32);
    let mut in_region = 0u64;
    let mut occupied = 0u64;

    let y_begin = (center.y - radius).max(0);
    let y_end = (center.y + radius).min(h - 1);
    let x_begin = (center.x - radius).max(0);
    let x_end = (center.x + radius).min(w - 1);

    for y in y_begin..y_end {
        let dy = y - center.y;
        let row = &mask[(y as usize) * (width as usize)..];
        for x in x_begin..x_end {
            let dx = x - center.x;
            if dx * dx + dy * dy <= radius * radius {
                in_region += 1;
                if row[x as usize] != 0 {
                    occupied += 1;
                }
            }
        }
    }

    if in_region == 0 {
        return Err(OccupancyError::DegenerateRegion {
            x: center.x,
            y: center.y,
            radius,
        });
    }
    Ok(occupied as f64 / in_region as f64)
}

/// The paired measurement taken for every accepted sample. Fails with
/// `RegionUnset` if either circle has not been placed.
pub fn occupancy_pair(
    mask: &[u8],
    width: u32,
    height: u32,
    regions: &RegionPair,
) -> Result<(f64, f64), OccupancyError> {
    let left_center = regions.left.ok_or(OccupancyError::RegionUnset)?;
    let right_center = regions.right.ok_or(OccupancyError::RegionUnset)?;
    let left = occupancy(mask, width, height, left_center, regions.radius)?;
    let right = occupancy(mask, width, height, right_center, regions.radius)?;
    Ok((left, right))
}
