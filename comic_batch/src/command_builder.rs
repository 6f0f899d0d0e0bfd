//! Command Builder
//!
//! Turns one page into one or two `gm batch` command lines:
//!
//! ```text
//! convert 'src' [-crop WxH+X+Y] -resize xH [-colorspace GRAY] [-unsharp RxS+A+T] -quality Q 'dst'
//! ```
//!
//! Wide pages are split right half first (`-1.jpg`) then left half
//! (`-2.jpg`) so right-to-left reading order survives a plain name sort.

use crate::error::{ProcessingError, Result};
use crate::params::ProcessingParameters;
use crate::path_manager::{DuplicateIndex, PathManager};
use crate::types::{Dimensions, ImageRef};
use std::path::Path;

pub const OUTPUT_EXTENSION: &str = ".jpg";
pub const RIGHT_HALF_SUFFIX: &str = "-1.jpg";
pub const LEFT_HALF_SUFFIX: &str = "-2.jpg";

/// Single-quote `s` for the tool's unix-style command parser.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn quoted_path(path: &Path) -> Result<String> {
    path.to_str()
        .map(shell_quote)
        .ok_or_else(|| ProcessingError::EncodingFailed(path.to_path_buf()))
}

/// Crop region `WxH+X+Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

impl Crop {
    pub fn geometry(&self) -> String {
        format!("{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// `(right, left)` halves; the left half takes the extra column of an odd
/// width.
pub fn split_halves(dims: Dimensions) -> (Crop, Crop) {
    let left_width = dims.width.div_ceil(2);
    let right = Crop {
        width: dims.width - left_width,
        height: dims.height,
        x: left_width,
        y: 0,
    };
    let left = Crop {
        width: left_width,
        height: dims.height,
        x: 0,
        y: 0,
    };
    (right, left)
}

pub struct CommandBuilder<'a> {
    params: &'a ProcessingParameters,
    paths: &'a PathManager,
    duplicates: &'a DuplicateIndex,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(
        params: &'a ProcessingParameters,
        paths: &'a PathManager,
        duplicates: &'a DuplicateIndex,
    ) -> Self {
        Self {
            params,
            paths,
            duplicates,
        }
    }

    pub fn needs_split(&self, dims: Dimensions) -> bool {
        // a 1px page has no right half
        dims.width >= self.params.width_threshold && dims.width >= 2
    }

    /// Commands for `image`, in emission order. Output paths are reserved
    /// in `output_dir` as a side effect.
    pub fn build(
        &self,
        image: &ImageRef,
        dims: Dimensions,
        output_dir: &Path,
    ) -> Result<Vec<String>> {
        let source = quoted_path(&image.path)?;
        let stem = self.duplicates.output_base_name(image);

        if !self.needs_split(dims) {
            return self
                .paths
                .reserve(output_dir, &stem, &[OUTPUT_EXTENSION])
                .iter()
                .map(|target| Ok(self.command(&source, None, &quoted_path(target)?)))
                .collect();
        }

        let (right, left) = split_halves(dims);
        let targets = self
            .paths
            .reserve(output_dir, &stem, &[RIGHT_HALF_SUFFIX, LEFT_HALF_SUFFIX]);

        let mut commands = Vec::with_capacity(2);
        for (crop, target) in [right, left].into_iter().zip(&targets) {
            commands.push(self.command(&source, Some(crop), &quoted_path(target)?));
        }
        Ok(commands)
    }

    fn command(&self, source: &str, crop: Option<Crop>, target: &str) -> String {
        let mut parts: Vec<String> = vec!["convert".into(), source.to_string()];

        if let Some(crop) = crop {
            parts.push("-crop".into());
            parts.push(crop.geometry());
        }

        parts.push("-resize".into());
        parts.push(format!("x{}", self.params.resize_height));

        if self.params.grayscale {
            parts.push("-colorspace".into());
            parts.push("GRAY".into());
        }

        if self.params.unsharp.is_enabled() {
            parts.push("-unsharp".into());
            parts.push(self.params.unsharp.geometry());
        }

        parts.push("-quality".into());
        parts.push(self.params.quality.to_string());
        parts.push(target.to_string());

        parts.join(" ")
    }
}
