//! Assembly of closed rings and multi-polygons out of way fragments.

use super::*;
use geo::{Area, BoundingRect, Contains, Intersects};

/// Chain point sequences that share endpoints into closed rings.
///
/// Sequences are joined greedily in input order: the first remaining sequence that starts
/// or ends at the open end of the current chain is appended, reversed if necessary. The
/// shared junction point is kept only once.
///
/// Chains that never close, or that close with fewer than [MIN_RING_POINTS] points, are
/// dropped.
pub fn merge_rings(sequences: Vec<Vec<LatpLon>>) -> Vec<Vec<LatpLon>> {
    let mut pending: Vec<Option<Vec<LatpLon>>> = sequences
        .into_iter()
        .filter(|seq| !seq.is_empty())
        .map(Some)
        .collect();
    let mut rings = Vec::new();
    for index in 0..pending.len() {
        let Some(mut chain) = pending[index].take() else {
            continue;
        };
        while !is_closed(&chain) {
            if !extend_tail(&mut chain, &mut pending) && !extend_head(&mut chain, &mut pending) {
                break;
            }
        }
        if is_closed(&chain) && chain.len() >= MIN_RING_POINTS {
            rings.push(chain);
        } else {
            log::debug!(
                "Dropping a ring fragment of {} points that does not close",
                chain.len()
            );
        }
    }
    rings
}

fn is_closed(chain: &[LatpLon]) -> bool {
    chain.len() > 1 && chain.first() == chain.last()
}

/// Append the first pending sequence that touches the end of `chain`.
fn extend_tail(chain: &mut Vec<LatpLon>, pending: &mut [Option<Vec<LatpLon>>]) -> bool {
    let Some(&tail) = chain.last() else {
        return false;
    };
    let found = pending.iter().position(|slot| match slot {
        Some(seq) => seq.first() == Some(&tail) || seq.last() == Some(&tail),
        None => false,
    });
    match found.and_then(|position| pending[position].take()) {
        Some(mut next) => {
            if next.first() != Some(&tail) {
                next.reverse();
            }
            chain.extend(next.into_iter().skip(1));
            true
        }
        None => false,
    }
}

/// Prepend the first pending sequence that touches the start of `chain`.
fn extend_head(chain: &mut Vec<LatpLon>, pending: &mut [Option<Vec<LatpLon>>]) -> bool {
    let Some(&head) = chain.first() else {
        return false;
    };
    let found = pending.iter().position(|slot| match slot {
        Some(seq) => seq.first() == Some(&head) || seq.last() == Some(&head),
        None => false,
    });
    match found.and_then(|position| pending[position].take()) {
        Some(mut previous) => {
            if previous.last() != Some(&head) {
                previous.reverse();
            }
            previous.extend(chain.drain(..).skip(1));
            *chain = previous;
            true
        }
        None => false,
    }
}

/// Combine merged outer and inner rings into a corrected multi-polygon.
///
/// Every inner ring becomes a hole of the smallest outer ring that contains it. Inner rings
/// outside of all outer rings are dropped.
pub fn build_multi_polygon(
    outer_rings: Vec<Vec<LatpLon>>,
    inner_rings: Vec<Vec<LatpLon>>,
) -> MultiPolygon {
    let mut polygons: Vec<Polygon> = outer_rings
        .iter()
        .map(|ring| Polygon::new(linestring_from(ring), vec![]))
        .collect();
    // holes are matched against the bare shells
    let shells = polygons.clone();
    let shell_areas: Vec<f64> = shells.iter().map(|shell| shell.unsigned_area()).collect();
    for ring in inner_rings.iter() {
        let hole = linestring_from(ring);
        let container = shells
            .iter()
            .enumerate()
            .filter(|(_, shell)| ring_within(&hole, shell))
            .min_by(|(a, _), (b, _)| shell_areas[*a].total_cmp(&shell_areas[*b]))
            .map(|(position, _)| position);
        match container {
            Some(position) => polygons[position].interiors_push(hole),
            None => log::debug!(
                "Dropping an inner ring of {} points outside of all outer rings",
                ring.len()
            ),
        }
    }
    correct_multi_polygon(&MultiPolygon::new(polygons))
}

fn ring_within(ring: &Linestring, shell: &Polygon) -> bool {
    let (Some(ring_bounds), Some(shell_bounds)) = (ring.bounding_rect(), shell.bounding_rect())
    else {
        return false;
    };
    if !shell_bounds.intersects(&ring_bounds) {
        return false;
    }
    ring.0.iter().all(|c| shell.intersects(c)) && ring.0.iter().any(|c| shell.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::validity::check_multi_polygon;
    use approx::assert_abs_diff_eq;

    fn p(lon: i32, latp: i32) -> LatpLon {
        LatpLon::new(latp, lon)
    }

    #[test]
    fn test_merge_two_halves() {
        let rings = merge_rings(vec![
            vec![p(0, 0), p(10, 0), p(10, 10)],
            vec![p(10, 10), p(0, 10), p(0, 0)],
        ]);
        assert_eq!(rings.len(), 1);
        assert_eq!(
            rings[0],
            vec![p(0, 0), p(10, 0), p(10, 10), p(0, 10), p(0, 0)]
        );
    }

    #[test]
    fn test_merge_reverses_fragments() {
        // second fragment points the wrong way, third one attaches at the head
        let rings = merge_rings(vec![
            vec![p(10, 0), p(10, 10)],
            vec![p(0, 10), p(10, 10)],
            vec![p(0, 0), p(10, 0)],
            vec![p(0, 10), p(0, 0)],
        ]);
        assert_eq!(rings.len(), 1);
        let ring = &rings[0];
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
        for corner in [p(0, 0), p(10, 0), p(10, 10), p(0, 10)] {
            assert!(ring.contains(&corner));
        }
    }

    #[test]
    fn test_merge_drops_open_and_degenerate_chains() {
        let rings = merge_rings(vec![
            vec![p(0, 0), p(5, 5)],
            vec![p(5, 5), p(9, 9)],
            vec![p(20, 20), p(21, 21), p(20, 20)],
            vec![],
            vec![p(30, 30), p(31, 30), p(31, 31), p(30, 30)],
        ]);
        assert_eq!(rings, vec![vec![p(30, 30), p(31, 30), p(31, 31), p(30, 30)]]);
    }

    #[test]
    fn test_holes_go_to_smallest_container() {
        let big = vec![p(0, 0), p(100, 0), p(100, 100), p(0, 100), p(0, 0)];
        let island = vec![p(10, 10), p(50, 10), p(50, 50), p(10, 50), p(10, 10)];
        let pond = vec![p(20, 20), p(30, 20), p(30, 30), p(20, 30), p(20, 20)];
        let stray = vec![p(200, 200), p(210, 200), p(210, 210), p(200, 200)];
        let multi_polygon = build_multi_polygon(vec![big, island], vec![pond, stray]);
        assert_eq!(multi_polygon.0.len(), 2);
        assert!(multi_polygon.0[0].interiors().is_empty());
        assert_eq!(multi_polygon.0[1].interiors().len(), 1);
        assert_eq!(check_multi_polygon(&multi_polygon), Ok(()));
        // island area minus pond, in squared projected degrees
        let island_area = multi_polygon.0[1].unsigned_area();
        assert_abs_diff_eq!(island_area, (1600.0 - 100.0) * 1e-14, epsilon = 1e-18);
    }
}
