//! Browser for the lapdMouse data archive and converters from airway tree
//! files and measurement tables to renderable meshes.

pub mod cache;
pub mod config;
pub mod dataset;
pub mod download;
pub mod error;
pub mod geometry;
pub mod launch;
pub mod measurements;
pub mod remote;
pub mod scene;
pub mod transfer;
pub mod tree;
pub mod vtk;
