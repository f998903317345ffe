use std::f64::consts::PI;

use crate::error::ArchiveError;
use crate::measurements::{MeasurementTable, TableKind};
use crate::tree::{Point3, TubeSegment, TubeTree};

/// Canonical airway branch names; a segment named `MAIN_BRANCH_LABELS[i]`
/// is labelled `i + 1`, everything else `0`.
pub const MAIN_BRANCH_LABELS: [&str; 7] = ["Trachea", "LMB", "RMB", "CrRMB", "MiRMB", "CaRMB", "AcRMB"];

pub const CYLINDER_RESOLUTION: usize = 8;
pub const SPHERE_THETA_RESOLUTION: usize = 8;
pub const SPHERE_PHI_RESOLUTION: usize = 8;

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarName {
    BranchLabel,
    MeasurementMean,
}

impl ScalarName {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarName::BranchLabel => "BranchLabel",
            ScalarName::MeasurementMean => "MeasurementMean",
        }
    }
}

/// A single shape before it is merged into a mesh. Polygon indices refer to
/// this primitive's own points.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub points: Vec<Point3>,
    pub polygons: Vec<Vec<usize>>,
}

/// Concatenated primitives with one named scalar per point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    points: Vec<Point3>,
    polygons: Vec<Vec<usize>>,
    scalar_name: Option<ScalarName>,
    scalars: Vec<f64>,
    primitive_count: usize,
}

impl Mesh {
    pub fn new(scalar_name: ScalarName) -> Self {
        Self {
            scalar_name: Some(scalar_name),
            ..Self::default()
        }
    }

    /// Appends `primitive`, tagging each of its points with `value`.
    pub fn append(&mut self, primitive: Primitive, value: f64) {
        let offset = self.points.len();
        self.scalars
            .extend(std::iter::repeat(value).take(primitive.points.len()));
        self.points.extend(primitive.points);
        self.polygons.extend(
            primitive
                .polygons
                .into_iter()
                .map(|polygon| polygon.into_iter().map(|index| index + offset).collect()),
        );
        self.primitive_count += 1;
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn polygons(&self) -> &[Vec<usize>] {
        &self.polygons
    }

    pub fn scalar_name(&self) -> Option<ScalarName> {
        self.scalar_name
    }

    pub fn scalars(&self) -> &[f64] {
        &self.scalars
    }

    pub fn primitive_count(&self) -> usize {
        self.primitive_count
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

pub fn branch_label(name: Option<&str>) -> f64 {
    name.and_then(|name| MAIN_BRANCH_LABELS.iter().position(|label| *label == name))
        .map_or(0.0, |index| (index + 1) as f64)
}

/// Cylinder from the first to the last point of a tube, with the mean of
/// its radii. `None` for fewer than two points or a zero-length axis.
pub fn tube_to_cylinder(segment: &TubeSegment) -> Option<Primitive> {
    if segment.points.len() < 2 || segment.radii.is_empty() {
        return None;
    }
    let start = segment.points[0];
    let end = segment.points[segment.points.len() - 1];
    let direction = sub(end, start);
    let length = norm(direction);
    if length <= EPSILON {
        return None;
    }
    let radius = segment.radii.iter().sum::<f64>() / segment.radii.len() as f64;
    let center = scale(add(start, end), 0.5);
    create_cylinder(center, direction, radius, length)
}

pub fn tube_to_mesh(segment: &TubeSegment) -> Mesh {
    let mut mesh = Mesh::new(ScalarName::BranchLabel);
    if let Some(cylinder) = tube_to_cylinder(segment) {
        mesh.append(cylinder, branch_label(segment.name.as_deref()));
    }
    mesh
}

/// One cylinder per segment, in ascending segment ID order.
pub fn tree_to_mesh(tree: &TubeTree) -> Mesh {
    let mut mesh = Mesh::new(ScalarName::BranchLabel);
    for segment in tree.segments() {
        if let Some(cylinder) = tube_to_cylinder(segment) {
            mesh.append(cylinder, branch_label(segment.name.as_deref()));
        }
    }
    mesh
}

pub fn measurements_to_mesh(table: &MeasurementTable) -> Mesh {
    match table.kind() {
        TableKind::Tree => tree_table_to_mesh(table),
        TableKind::AreaMeasurements => {
            spheres_from_rows(table, "area", |area| (area / (4.0 * PI)).sqrt())
        }
        TableKind::VolumeMeasurements => {
            spheres_from_rows(table, "volume", |volume| (3.0 * volume / (4.0 * PI)).cbrt())
        }
        TableKind::Unknown => {
            log::warn!("{}", ArchiveError::UnclassifiableSchema);
            Mesh::default()
        }
    }
}

fn centroid(table: &MeasurementTable, row: usize) -> Option<Point3> {
    Some([
        table.number(row, "centroidX")?,
        table.number(row, "centroidY")?,
        table.number(row, "centroidZ")?,
    ])
}

/// Center, direction, radius and length of a tree table row.
fn tree_row(table: &MeasurementTable, row: usize) -> Option<(Point3, Point3, f64, f64)> {
    let direction = [
        table.number(row, "directionX")?,
        table.number(row, "directionY")?,
        table.number(row, "directionZ")?,
    ];
    Some((
        centroid(table, row)?,
        direction,
        table.number(row, "radius")?,
        table.number(row, "length")?,
    ))
}

/// Size, mean and center of an area or volume row.
fn sphere_row(table: &MeasurementTable, row: usize, size_column: &str) -> Option<(f64, f64, Point3)> {
    Some((
        table.number(row, size_column)?,
        table.number(row, "mean")?,
        centroid(table, row)?,
    ))
}

fn tree_table_to_mesh(table: &MeasurementTable) -> Mesh {
    let mut mesh = Mesh::new(ScalarName::BranchLabel);
    for row in 0..table.row_count() {
        let Some((center, direction, radius, length)) = tree_row(table, row) else {
            log::warn!("Skipping tree table row {row}: missing or non-numeric values");
            continue;
        };
        match create_cylinder(center, direction, radius, length) {
            Some(cylinder) => mesh.append(cylinder, branch_label(table.text(row, "name"))),
            None => log::warn!("Skipping tree table row {row}: degenerate cylinder"),
        }
    }
    mesh
}

fn spheres_from_rows<F>(table: &MeasurementTable, size_column: &str, radius_of: F) -> Mesh
where
    F: Fn(f64) -> f64,
{
    let mut mesh = Mesh::new(ScalarName::MeasurementMean);
    for row in 0..table.row_count() {
        let Some((size, mean, center)) = sphere_row(table, row, size_column) else {
            log::warn!("Skipping measurement row {row}: missing or non-numeric values");
            continue;
        };
        match create_sphere(center, radius_of(size)) {
            Some(sphere) => mesh.append(sphere, mean),
            None => log::warn!("Skipping measurement row {row}: {size_column} {size} gives no radius"),
        }
    }
    mesh
}

/// Capped cylinder of the given radius whose axis runs through `center`
/// along `direction`, `length` long in total.
///
/// The unit cylinder is built along its local Y axis and rotated into an
/// orthonormal frame spanned by the direction and a fixed up vector.
pub fn create_cylinder(
    center: Point3,
    direction: Point3,
    radius: f64,
    length: f64,
) -> Option<Primitive> {
    if !radius.is_finite() || !length.is_finite() || center.iter().any(|c| !c.is_finite()) {
        return None;
    }
    let axis = normalize(direction)?;
    let side = normalize(cross(axis, [1.0, 1.0, 1.0]))
        .or_else(|| normalize(cross(axis, [1.0, 0.0, 0.0])))?;
    let normal = cross(side, axis);
    let start = sub(center, scale(axis, length / 2.0));

    let n = CYLINDER_RESOLUTION;
    let mut points = Vec::with_capacity(2 * n);
    for height in [1.0, 0.0] {
        for i in 0..n {
            let angle = 2.0 * PI * i as f64 / n as f64;
            let local_x = radius * angle.cos();
            let local_z = -radius * angle.sin();
            let along = scale(axis, height * length);
            let across = add(scale(normal, -local_x), scale(side, local_z));
            points.push(add(start, add(along, across)));
        }
    }

    let mut polygons = Vec::with_capacity(n + 2);
    for i in 0..n {
        let next = (i + 1) % n;
        polygons.push(vec![i, next, n + next, n + i]);
    }
    polygons.push((0..n).collect());
    polygons.push((n..2 * n).rev().collect());

    Some(Primitive { points, polygons })
}

pub fn create_sphere(center: Point3, radius: f64) -> Option<Primitive> {
    if !radius.is_finite() || radius < 0.0 || center.iter().any(|c| !c.is_finite()) {
        return None;
    }
    let theta_steps = SPHERE_THETA_RESOLUTION;
    let rings = SPHERE_PHI_RESOLUTION - 2;

    let mut points = Vec::with_capacity(2 + theta_steps * rings);
    points.push(add(center, [0.0, 0.0, radius]));
    points.push(add(center, [0.0, 0.0, -radius]));
    for i in 0..theta_steps {
        let theta = 2.0 * PI * i as f64 / theta_steps as f64;
        for j in 1..=rings {
            let phi = PI * j as f64 / (SPHERE_PHI_RESOLUTION - 1) as f64;
            points.push(add(
                center,
                [
                    radius * phi.sin() * theta.cos(),
                    radius * phi.sin() * theta.sin(),
                    radius * phi.cos(),
                ],
            ));
        }
    }

    let ring = |i: usize, j: usize| 2 + (i % theta_steps) * rings + (j - 1);
    let mut polygons = Vec::with_capacity(2 * theta_steps * rings);
    for i in 0..theta_steps {
        polygons.push(vec![0, ring(i, 1), ring(i + 1, 1)]);
        for j in 1..rings {
            polygons.push(vec![ring(i, j), ring(i, j + 1), ring(i + 1, j + 1)]);
            polygons.push(vec![ring(i, j), ring(i + 1, j + 1), ring(i + 1, j)]);
        }
        polygons.push(vec![1, ring(i + 1, rings), ring(i, rings)]);
    }

    Some(Primitive { points, polygons })
}

fn add(a: Point3, b: Point3) -> Point3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn scale(a: Point3, factor: f64) -> Point3 {
    [a[0] * factor, a[1] * factor, a[2] * factor]
}

fn dot(a: Point3, b: Point3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: Point3, b: Point3) -> Point3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: Point3) -> f64 {
    dot(a, a).sqrt()
}

fn normalize(a: Point3) -> Option<Point3> {
    let length = norm(a);
    if !length.is_finite() || length <= EPSILON {
        return None;
    }
    Some(scale(a, 1.0 / length))
}
