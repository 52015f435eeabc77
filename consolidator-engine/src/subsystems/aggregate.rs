//! Aggregation subsystem — segments into sessions
//!
//! Clusters a stream of timestamped segments into session groups, then builds
//! one `Session` per group. A new group starts when:
//! - the next segment starts more than `max_gap` after the latest end seen in
//!   the open group, or
//! - any grouping key resolves differently than on the previous segment.

use chrono::Duration;
use consolidator_core::config::AggregationConfig;
use consolidator_core::{ConsolidatorError, Segment, Session};

use super::builder::SessionBuilder;

/// Group `segments` into sessions by time gap and key continuity.
///
/// Input order does not matter: segments are stably sorted by `start_time`
/// first. Every input segment lands in exactly one group.
pub fn cluster(
    mut segments: Vec<Segment>,
    max_gap: Duration,
    grouping_keys: Option<&[String]>,
) -> Vec<Vec<Segment>> {
    segments.sort_by_key(|s| s.start_time);

    let keys = grouping_keys.unwrap_or(&[]);
    let mut groups: Vec<Vec<Segment>> = Vec::new();
    let mut iter = segments.into_iter();

    let Some(first) = iter.next() else {
        return groups;
    };

    let mut group_end = first.end_time;
    let mut current = vec![first];

    for segment in iter {
        // `current` is never empty inside the loop
        let previous = &current[current.len() - 1];

        let gap_exceeded = segment.start_time - group_end > max_gap;
        let key_drift = keys
            .iter()
            .any(|key| segment.key_value(key) != previous.key_value(key));

        if gap_exceeded || key_drift {
            group_end = segment.end_time;
            groups.push(std::mem::replace(&mut current, vec![segment]));
        } else {
            group_end = group_end.max(segment.end_time);
            current.push(segment);
        }
    }

    groups.push(current);
    groups
}

/// Cluster `segments` with the configured gap and keys and build one session
/// per group.
///
/// Guessed customer, contact and title come from the first segment in each
/// group that carries the configured attribute.
pub fn aggregate(
    segments: Vec<Segment>,
    config: &AggregationConfig,
    source_system: &str,
    source_name: &str,
) -> Result<Vec<Session>, ConsolidatorError> {
    let total = segments.len();
    let max_gap = config.max_gap()?;
    let keys = (!config.grouping_keys.is_empty()).then_some(config.grouping_keys.as_slice());
    let groups = cluster(segments, max_gap, keys);

    tracing::info!(
        source_system,
        segments = total,
        groups = groups.len(),
        "Clustered segments into session groups"
    );

    groups
        .into_iter()
        .map(|group| {
            let first_with = |key: &str| {
                group
                    .iter()
                    .find_map(|s| s.attribute_str(key))
                    .map(str::to_string)
            };

            let mut identifiers = vec![source_name.to_string()];
            identifiers.extend(group.iter().map(|s| s.id.clone()));

            SessionBuilder::new(source_system)
                .source_identifiers(identifiers)
                .customer_name(first_with(&config.customer_key))
                .contact_name(first_with(&config.contact_key))
                .title(first_with(&config.title_key))
                .build(group)
        })
        .collect()
}
