//! Labeled image directory discovery and batch loading.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::preprocess::{push_pixels, resize_rgb};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

/// A dataset laid out as `root/<class name>/<images>`.
#[derive(Debug)]
pub struct LabeledDirectory {
    pub root: PathBuf,
    /// Class names sorted by name; a class's index is its label.
    pub classes: Vec<String>,
    files: Vec<Vec<PathBuf>>,
}

impl LabeledDirectory {
    pub fn scan<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!("Scanning dataset at {:?}", root);

        if !root.is_dir() {
            return Err(Error::Dataset(format!(
                "dataset directory does not exist: {:?}",
                root
            )));
        }

        let mut classes = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    classes.push(name.to_string());
                }
            }
        }
        classes.sort();

        if classes.is_empty() {
            return Err(Error::Dataset(format!("no class directories in {:?}", root)));
        }

        let mut files = Vec::with_capacity(classes.len());
        for class_name in &classes {
            let class_files: Vec<PathBuf> = WalkDir::new(root.join(class_name))
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_image(e.path()))
                .map(|e| e.into_path())
                .collect();
            debug!("Class '{}': {} images", class_name, class_files.len());
            files.push(class_files);
        }

        let dataset = LabeledDirectory {
            root,
            classes,
            files,
        };
        info!(
            "Found {} images in {} classes",
            dataset.len(),
            dataset.num_classes()
        );
        Ok(dataset)
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn len(&self) -> usize {
        self.files.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits every class independently: the first `⌊fraction·n⌋` files of a
    /// class go to validation, the rest to training.
    pub fn split(&self, validation_fraction: f32) -> (Vec<ImageSample>, Vec<ImageSample>) {
        let mut training = Vec::new();
        let mut validation = Vec::new();

        for (label, class_files) in self.files.iter().enumerate() {
            let cut = (validation_fraction * class_files.len() as f32) as usize;
            for (i, path) in class_files.iter().enumerate() {
                let sample = ImageSample {
                    path: path.clone(),
                    label,
                };
                if i < cut {
                    validation.push(sample);
                } else {
                    training.push(sample);
                }
            }
        }

        (training, validation)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Images (NHWC, `[0, 1]`) and one-hot labels for a group of samples.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Vec<f32>,
    pub labels: Vec<f32>,
    pub len: usize,
}

/// Loads `samples`, passing each resized image through `transform`.
pub fn load_batch<F>(
    samples: &[ImageSample],
    num_classes: usize,
    image_size: u32,
    mut transform: F,
) -> Result<Batch>
where
    F: FnMut(RgbImage) -> RgbImage,
{
    let pixels = (image_size * image_size * 3) as usize;
    let mut images = Vec::with_capacity(samples.len() * pixels);
    let mut labels = vec![0.0f32; samples.len() * num_classes];

    for (i, sample) in samples.iter().enumerate() {
        let img = image::open(&sample.path)?;
        let img = transform(resize_rgb(&img, image_size));
        push_pixels(&img, &mut images);
        labels[i * num_classes + sample.label] = 1.0;
    }

    Ok(Batch {
        images,
        labels,
        len: samples.len(),
    })
}

pub fn write_class_list(path: &Path, classes: &[String]) -> Result<()> {
    let mut contents = classes.join("\n");
    contents.push('\n');
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use image::{DynamicImage, Rgb};

    use super::*;
    use crate::model::read_class_list;

    /// Writes `counts[i]` small PNGs under `root/<classes[i]>/`.
    pub(crate) fn write_dataset(root: &Path, classes: &[&str], counts: &[usize]) {
        for (class_name, &count) in classes.iter().zip(counts) {
            let dir = root.join(class_name);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                let img = RgbImage::from_pixel(16, 12, Rgb([i as u8 * 10, 120, 40]));
                DynamicImage::ImageRgb8(img)
                    .save(dir.join(format!("leaf_{:02}.png", i)))
                    .unwrap();
            }
        }
    }

    #[test]
    fn classes_are_sorted_and_non_images_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(
            dir.path(),
            &["Tomato_mosaic_virus", "Tomato_healthy"],
            &[3, 2],
        );
        fs::write(dir.path().join("Tomato_healthy/notes.txt"), "ignore me").unwrap();
        fs::write(dir.path().join("README.md"), "top-level file").unwrap();

        let dataset = LabeledDirectory::scan(dir.path()).unwrap();
        assert_eq!(dataset.classes, vec!["Tomato_healthy", "Tomato_mosaic_virus"]);
        assert_eq!(dataset.len(), 5);
    }

    #[test]
    fn split_is_per_class() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &["a", "b"], &[10, 4]);

        let dataset = LabeledDirectory::scan(dir.path()).unwrap();
        let (training, validation) = dataset.split(0.2);

        // 10 * 0.2 = 2 from class a, 4 * 0.2 = 0.8 -> 0 from class b
        assert_eq!(validation.len(), 2);
        assert!(validation.iter().all(|s| s.label == 0));
        assert!(validation[0].path.ends_with("a/leaf_00.png"));
        assert_eq!(training.len(), 12);
        assert_eq!(training.iter().filter(|s| s.label == 1).count(), 4);
    }

    #[test]
    fn missing_root_is_a_dataset_error() {
        let err = LabeledDirectory::scan("/nonexistent/tomato").unwrap_err();
        assert!(matches!(err, Error::Dataset(_)));
    }

    #[test]
    fn batch_has_one_hot_labels() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &["a", "b", "c"], &[1, 1, 1]);
        let dataset = LabeledDirectory::scan(dir.path()).unwrap();
        let (training, _) = dataset.split(0.0);

        let batch = load_batch(&training, 3, 8, |img| img).unwrap();
        assert_eq!(batch.len, 3);
        assert_eq!(batch.images.len(), 3 * 8 * 8 * 3);
        assert_eq!(
            batch.labels,
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
        );
        assert!(batch.images.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn class_list_round_trips_through_the_service_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("class_list.txt");
        let classes = vec!["Tomato_healthy".to_string(), "Tomato_leaf_mold".to_string()];
        write_class_list(&path, &classes).unwrap();
        assert_eq!(read_class_list(&path).unwrap(), classes);
    }
}
