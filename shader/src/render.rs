// render.rs — Host stand-in: scene loading and a worker-pool shading loop
//
// A scene file pairs render options with one node's parameters and a set
// of user attributes. `render_grid` plays the renderer: it builds a fixed
// rayon pool of `options.threads` workers and issues one evaluation request
// per sample of a `width × height` grid, tagging each request with the
// worker's stable pool index.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dispatch::ShadeError;
use crate::globals::{AttributeValue, GlobalField, GlobalValue, RenderOptions, ShaderGlobals};
use crate::node::{NodeParams, ShaderNode};
use crate::value::Vec3;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid scene: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Shade(#[from] ShadeError),
}

/// One node to shade, with the options and attributes of its render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scene {
    pub name: Option<String>,
    pub options: RenderOptions,
    pub node: NodeParams,
    /// Attributes attached to every sample.
    pub attributes: HashMap<String, AttributeValue>,
}

impl Scene {
    pub fn from_json(text: &str) -> Result<Scene, LoadError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Scene, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Scene::from_json(&text)
    }

    pub fn node_name(&self) -> &str {
        self.name.as_deref().unwrap_or("seexpr")
    }

    pub fn build_node(&self) -> ShaderNode {
        ShaderNode::new(self.node_name(), self.node.clone(), &self.options)
    }
}

/// Shader globals for sample `index` of a `width × height` grid, as a
/// camera ray hitting a unit plane facing the viewer would see them.
pub fn sample_globals(index: usize, width: usize, height: usize, worker: usize) -> ShaderGlobals {
    let x = index % width.max(1);
    let y = index / width.max(1);
    let w = width.max(1) as f32;
    let h = height.max(1) as f32;
    let u = (x as f32 + 0.5) / w;
    let v = (y as f32 + 0.5) / h;
    let p = Vec3::new(u, v, 0.0);
    let n = Vec3::new(0.0, 0.0, 1.0);
    let eye = Vec3::new(0.5, 0.5, 1.0);

    let vector = GlobalValue::Vector;
    let float = GlobalValue::Float;
    let mut sg = ShaderGlobals::new(index as u64 + 1, worker);
    for (field, value) in [
        (GlobalField::P, vector(p)),
        (GlobalField::Po, vector(p)),
        (GlobalField::N, vector(n)),
        (GlobalField::Nf, vector(n)),
        (GlobalField::Ng, vector(n)),
        (GlobalField::Ngf, vector(n)),
        (GlobalField::Ro, vector(eye)),
        (GlobalField::Rd, vector(Vec3::new(p.x - eye.x, p.y - eye.y, p.z - eye.z))),
        (GlobalField::DPdx, vector(Vec3::new(1.0 / w, 0.0, 0.0))),
        (GlobalField::DPdy, vector(Vec3::new(0.0, 1.0 / h, 0.0))),
        (GlobalField::DPdu, vector(Vec3::new(1.0, 0.0, 0.0))),
        (GlobalField::DPdv, vector(Vec3::new(0.0, 1.0, 0.0))),
        (GlobalField::DNdx, vector(Vec3::ZERO)),
        (GlobalField::DNdy, vector(Vec3::ZERO)),
        (GlobalField::DDdx, vector(Vec3::new(1.0 / w, 0.0, 0.0))),
        (GlobalField::DDdy, vector(Vec3::new(0.0, 1.0 / h, 0.0))),
        (GlobalField::Ci, GlobalValue::Color(Vec3::new(u, v, 0.0))),
        (GlobalField::U, float(u)),
        (GlobalField::V, float(v)),
        (GlobalField::Bu, float(u)),
        (GlobalField::Bv, float(v)),
        (GlobalField::Sx, float(2.0 * u - 1.0)),
        (GlobalField::Sy, float(2.0 * v - 1.0)),
        (GlobalField::We, float(1.0)),
        (GlobalField::Dudx, float(1.0 / w)),
        (GlobalField::Dudy, float(0.0)),
        (GlobalField::Dvdx, float(0.0)),
        (GlobalField::Dvdy, float(1.0 / h)),
        (GlobalField::Time, float((index % 8) as f32 / 7.0)),
        (GlobalField::Area, float(1.0 / (w * h))),
        (GlobalField::X, GlobalValue::Int(x as i32)),
        (GlobalField::Y, GlobalValue::Int(y as i32)),
        (GlobalField::Rl, GlobalValue::Double(1.0)),
        (GlobalField::Sc, GlobalValue::Byte(0)),
        (GlobalField::Rr, GlobalValue::Byte(0)),
        (GlobalField::RrRefl, GlobalValue::Byte(0)),
        (GlobalField::RrRefr, GlobalValue::Byte(0)),
        (GlobalField::RrDiff, GlobalValue::Byte(0)),
        (GlobalField::RrGloss, GlobalValue::Byte(0)),
        (GlobalField::Rt, GlobalValue::UInt16(1)),
    ] {
        sg.set(field, value);
    }
    sg
}

/// Shade every sample of the grid on a pool of `options.threads` workers.
/// The first hard error aborts the render.
pub fn render_grid(
    node: &ShaderNode,
    options: &RenderOptions,
    width: usize,
    height: usize,
    attributes: &HashMap<String, AttributeValue>,
) -> Result<Vec<Vec3>, RenderError> {
    let workers = options.worker_count();
    debug!(node = %node.config().name(), workers, width, height, "rendering grid");
    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
    let image = pool.install(|| {
        (0..width * height)
            .into_par_iter()
            .map(|index| {
                let worker = rayon::current_thread_index().unwrap_or(0);
                let mut sg = sample_globals(index, width, height, worker);
                for (name, value) in attributes {
                    sg = sg.with_attribute(name.clone(), value.clone());
                }
                node.shade(&sg)
            })
            .collect::<Result<Vec<Vec3>, ShadeError>>()
    })?;
    Ok(image)
}

/// Build the scene's node and render it.
pub fn render_scene(scene: &Scene, width: usize, height: usize) -> Result<Vec<Vec3>, RenderError> {
    let node = scene.build_node();
    render_grid(&node, &scene.options, width, height, &scene.attributes)
}

/// Write `image` as a plain-text (P3) PPM. Components are clamped to [0, 1].
pub fn write_ppm<W: Write + ?Sized>(
    out: &mut W,
    image: &[Vec3],
    width: usize,
    height: usize,
) -> io::Result<()> {
    writeln!(out, "P3")?;
    writeln!(out, "{width} {height}")?;
    writeln!(out, "255")?;
    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    for row in image.chunks(width.max(1)) {
        let line: Vec<String> = row
            .iter()
            .map(|px| format!("{} {} {}", channel(px.x), channel(px.y), channel(px.z)))
            .collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::InvocationContext;

    #[test]
    fn scene_defaults() {
        let scene = Scene::from_json(r#"{ "node": { "expression": "1" } }"#).unwrap();
        assert_eq!(scene.node_name(), "seexpr");
        assert_eq!(scene.options.worker_count(), 1);
        assert!(scene.attributes.is_empty());
    }

    #[test]
    fn bad_json_is_load_error() {
        assert!(matches!(Scene::from_json("{"), Err(LoadError::Json(_))));
    }

    #[test]
    fn sample_layout() {
        let sg = sample_globals(5, 4, 2, 0);
        assert_eq!(sg.global(GlobalField::X), Some(GlobalValue::Int(1)));
        assert_eq!(sg.global(GlobalField::Y), Some(GlobalValue::Int(1)));
        assert_eq!(sg.global(GlobalField::U), Some(GlobalValue::Float(0.375)));
        assert_eq!(sg.id().0, 6);
        assert_eq!(sg.global(GlobalField::Li), None);
    }

    #[test]
    fn grid_of_u() {
        let scene = Scene::from_json(
            r#"{ "options": { "threads": 2 }, "node": { "expression": "$sg::u" } }"#,
        )
        .unwrap();
        let image = render_scene(&scene, 2, 2).unwrap();
        assert_eq!(
            image,
            vec![
                Vec3::splat(0.25),
                Vec3::splat(0.75),
                Vec3::splat(0.25),
                Vec3::splat(0.75)
            ]
        );
    }

    #[test]
    fn attributes_reach_every_sample() {
        let scene = Scene::from_json(
            r#"{ "node": { "expression": "$user_f::w" }, "attributes": { "w": { "float": 0.5 } } }"#,
        )
        .unwrap();
        let image = render_scene(&scene, 3, 1).unwrap();
        assert!(image.iter().all(|px| *px == Vec3::splat(0.5)));
    }

    #[test]
    fn hard_error_aborts_render() {
        let scene = Scene::from_json(
            r#"{ "node": { "expression": "$sg::Li", "stop_on_error": true } }"#,
        )
        .unwrap();
        assert!(matches!(render_scene(&scene, 2, 2), Err(RenderError::Shade(_))));
    }

    #[test]
    fn ppm_output() {
        let mut out = Vec::new();
        write_ppm(&mut out, &[Vec3::new(1.0, 0.0, 2.0), Vec3::splat(0.5)], 2, 1).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "P3\n2 1\n255\n255 0 255 128 128 128\n");
    }
}
