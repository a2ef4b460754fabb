//! Diagnostic archive of classified tight crops.
//!
//! Two bucket directories (`noise`, `number`), emptied when the archive is
//! prepared. Files are named `<index>.png` with one counter shared by both
//! buckets, so the index gives the global classification order.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::detect::PlateClass;

pub struct CropArchive {
    noise_dir: PathBuf,
    number_dir: PathBuf,
    next_index: u64,
}

impl CropArchive {
    /// Create both directories, or remove the files already in them.
    pub fn prepare(noise_dir: &Path, number_dir: &Path) -> Result<Self> {
        if noise_dir == number_dir {
            return Err(anyhow!(
                "noise and number crops need separate directories ({})",
                noise_dir.display()
            ));
        }
        for dir in [noise_dir, number_dir] {
            reset_dir(dir)?;
        }
        Ok(Self {
            noise_dir: noise_dir.to_path_buf(),
            number_dir: number_dir.to_path_buf(),
            next_index: 0,
        })
    }

    /// Write `crop` into the bucket for `class`.
    pub fn save(&mut self, crop: &RgbImage, class: PlateClass) -> Result<PathBuf> {
        let dir = match class {
            PlateClass::Noise => &self.noise_dir,
            PlateClass::Number => &self.number_dir,
        };
        let path = dir.join(format!("{}.png", self.next_index));
        crop.save(&path)
            .with_context(|| format!("write crop {}", path.display()))?;
        self.next_index += 1;
        Ok(path)
    }

    pub fn saved(&self) -> u64 {
        self.next_index
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return std::fs::create_dir_all(dir)
            .with_context(|| format!("create crop directory {}", dir.display()));
    }
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("read crop directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() {
            std::fs::remove_file(&path)
                .with_context(|| format!("remove stale crop {}", path.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_empties_existing_buckets() -> Result<()> {
        let root = tempfile::tempdir()?;
        let noise = root.path().join("noise");
        let number = root.path().join("number");
        std::fs::create_dir_all(&noise)?;
        std::fs::write(noise.join("7.png"), b"stale")?;

        CropArchive::prepare(&noise, &number)?;
        assert!(number.is_dir());
        assert_eq!(std::fs::read_dir(&noise)?.count(), 0);
        Ok(())
    }

    #[test]
    fn index_is_shared_across_buckets() -> Result<()> {
        let root = tempfile::tempdir()?;
        let noise = root.path().join("noise");
        let number = root.path().join("number");
        let mut archive = CropArchive::prepare(&noise, &number)?;
        let crop = RgbImage::new(48, 48);

        assert_eq!(archive.save(&crop, PlateClass::Noise)?, noise.join("0.png"));
        assert_eq!(archive.save(&crop, PlateClass::Number)?, number.join("1.png"));
        assert_eq!(archive.save(&crop, PlateClass::Noise)?, noise.join("2.png"));
        assert_eq!(archive.saved(), 3);
        Ok(())
    }

    #[test]
    fn shared_directory_is_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        assert!(CropArchive::prepare(root.path(), root.path()).is_err());
    }
}
