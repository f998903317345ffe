use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::geometry::Mesh;

/// Writes `mesh` as legacy ASCII VTK polydata. The scalar array, if any, is
/// written as point data under its own name.
pub fn write_polydata<W: Write>(mesh: &Mesh, title: &str, writer: &mut W) -> std::io::Result<()> {
    let title = title.lines().next().unwrap_or_default();
    writeln!(writer, "# vtk DataFile Version 3.0")?;
    writeln!(writer, "{title}")?;
    writeln!(writer, "ASCII")?;
    writeln!(writer, "DATASET POLYDATA")?;

    writeln!(writer, "POINTS {} float", mesh.points().len())?;
    for [x, y, z] in mesh.points() {
        writeln!(writer, "{x} {y} {z}")?;
    }

    let polygons = mesh.polygons();
    let size = polygons.iter().map(|polygon| polygon.len() + 1).sum::<usize>();
    writeln!(writer, "POLYGONS {} {size}", polygons.len())?;
    for polygon in polygons {
        write!(writer, "{}", polygon.len())?;
        for index in polygon {
            write!(writer, " {index}")?;
        }
        writeln!(writer)?;
    }

    if let Some(name) = mesh.scalar_name() {
        writeln!(writer, "POINT_DATA {}", mesh.points().len())?;
        writeln!(writer, "SCALARS {} float 1", name.as_str())?;
        writeln!(writer, "LOOKUP_TABLE default")?;
        for value in mesh.scalars() {
            writeln!(writer, "{value}")?;
        }
    }
    Ok(())
}

pub fn save_mesh(mesh: &Mesh, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let title = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("lapdMouse mesh");
    write_polydata(mesh, title, &mut writer)
        .and_then(|()| writer.flush())
        .with_context(|| format!("Could not write mesh {}", path.display()))?;
    log::info!(
        "Wrote {} primitive(s), {} point(s) to {}",
        mesh.primitive_count(),
        mesh.points().len(),
        path.display()
    );
    Ok(())
}
