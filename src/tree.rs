use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::ArchiveError;

pub type Point3 = [f64; 3];

/// One tubular branch of an airway tree file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TubeSegment {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub name: Option<String>,
    pub points: Vec<Point3>,
    pub radii: Vec<f64>,
    pub child_ids: BTreeSet<i64>,
}

/// Parsed tube forest keyed by segment ID.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TubeTree {
    segments: BTreeMap<i64, TubeSegment>,
}

impl TubeTree {
    pub fn get(&self, id: i64) -> Option<&TubeSegment> {
        self.segments.get(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.segments.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &TubeSegment> {
        self.segments.values()
    }

    /// Segments without a parent in this tree, including those whose
    /// declared parent was never finalized.
    pub fn roots(&self) -> Vec<&TubeSegment> {
        self.segments
            .values()
            .filter(|segment| {
                segment
                    .parent_id
                    .map_or(true, |parent| !self.segments.contains_key(&parent))
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct PendingTube {
    id: Option<i64>,
    parent_id: Option<i64>,
    name: Option<String>,
    declared_points: usize,
    points: Vec<Point3>,
    radii: Vec<f64>,
}

impl PendingTube {
    fn finalize(self) -> Result<TubeSegment, ArchiveError> {
        let Some(id) = self.id else {
            return Err(ArchiveError::MalformedRecord {
                id: None,
                reason: "record has no ID".to_string(),
            });
        };
        Ok(TubeSegment {
            id,
            parent_id: self.parent_id,
            name: self.name,
            points: self.points,
            radii: self.radii,
            child_ids: BTreeSet::new(),
        })
    }

    fn malformed(&self, reason: impl Into<String>) -> ArchiveError {
        ArchiveError::MalformedRecord {
            id: self.id,
            reason: reason.into(),
        }
    }
}

enum ParseState {
    Outside,
    InRecord(PendingTube),
    ReadingPoints { tube: PendingTube, remaining: usize },
}

pub fn read_tree(path: &Path) -> Result<TubeTree> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Could not read tree file {}", path.display()))?;
    Ok(parse_tree(&text))
}

/// Parses the line-oriented tube format. Non-tube objects are skipped and
/// incomplete tube records are dropped with a warning; parsing never fails.
pub fn parse_tree(text: &str) -> TubeTree {
    let mut segments = BTreeMap::<i64, TubeSegment>::new();
    let mut state = ParseState::Outside;

    for raw_line in text.lines() {
        let line = raw_line.trim();

        if let Some(object_type) = field_value(line, "ObjectType") {
            match state {
                ParseState::InRecord(tube) | ParseState::ReadingPoints { tube, .. } => {
                    log::warn!(
                        "{}",
                        tube.malformed("record ended before all points were read")
                    );
                }
                ParseState::Outside => {}
            }
            state = if object_type.ends_with("Tube") {
                ParseState::InRecord(PendingTube::default())
            } else {
                ParseState::Outside
            };
            continue;
        }

        state = match state {
            ParseState::Outside => ParseState::Outside,
            ParseState::InRecord(tube) => read_record_field(tube, line, &mut segments),
            ParseState::ReadingPoints { tube, remaining } => {
                read_point_line(tube, remaining, line, &mut segments)
            }
        };
    }

    if let ParseState::InRecord(tube) | ParseState::ReadingPoints { tube, .. } = state {
        log::warn!("{}", tube.malformed("file ended before the record was complete"));
    }

    link_children(&mut segments);
    TubeTree { segments }
}

fn read_record_field(
    mut tube: PendingTube,
    line: &str,
    segments: &mut BTreeMap<i64, TubeSegment>,
) -> ParseState {
    let Some((key, value)) = line.split_once('=') else {
        return ParseState::InRecord(tube);
    };
    let value = value.trim();

    match key.trim() {
        "ID" => tube.id = value.parse().ok(),
        "ParentID" => tube.parent_id = value.parse().ok(),
        "Name" => tube.name = Some(value.to_string()),
        "NPoints" => tube.declared_points = value.parse().unwrap_or(0),
        "Points" => {
            let remaining = tube.declared_points;
            if remaining == 0 {
                finalize_into(tube, segments);
                return ParseState::Outside;
            }
            tube.points.reserve(remaining);
            tube.radii.reserve(remaining);
            return ParseState::ReadingPoints { tube, remaining };
        }
        _ => {}
    }
    ParseState::InRecord(tube)
}

fn read_point_line(
    mut tube: PendingTube,
    remaining: usize,
    line: &str,
    segments: &mut BTreeMap<i64, TubeSegment>,
) -> ParseState {
    if line.is_empty() {
        return ParseState::ReadingPoints { tube, remaining };
    }

    let values = line
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>();
    let values = match values {
        Ok(values) if values.len() >= 4 => values,
        Ok(values) => {
            log::warn!(
                "{}",
                tube.malformed(format!(
                    "point line has {} values, expected at least 4",
                    values.len()
                ))
            );
            return ParseState::Outside;
        }
        Err(err) => {
            log::warn!("{}", tube.malformed(format!("invalid point value: {err}")));
            return ParseState::Outside;
        }
    };

    tube.points.push([values[0], values[1], values[2]]);
    tube.radii.push(values[3]);

    let remaining = remaining - 1;
    if remaining == 0 {
        finalize_into(tube, segments);
        return ParseState::Outside;
    }
    ParseState::ReadingPoints { tube, remaining }
}

fn finalize_into(tube: PendingTube, segments: &mut BTreeMap<i64, TubeSegment>) {
    match tube.finalize() {
        Ok(segment) => {
            segments.insert(segment.id, segment);
        }
        Err(err) => log::warn!("{err}"),
    }
}

fn link_children(segments: &mut BTreeMap<i64, TubeSegment>) {
    let links = segments
        .values()
        .filter_map(|segment| segment.parent_id.map(|parent| (parent, segment.id)))
        .collect::<Vec<_>>();
    for (parent, child) in links {
        if let Some(parent_segment) = segments.get_mut(&parent) {
            parent_segment.child_ids.insert(child);
        }
    }
}

fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let (name, value) = line.split_once('=')?;
    if name.trim() == key {
        Some(value.trim())
    } else {
        None
    }
}
