use std::path::Path;

use crate::errors::SupError;
use crate::manifest::{validation, Manifest};

pub(super) fn run(manifest_file: &str) -> Result<(), SupError> {
    let start = std::time::Instant::now();

    let manifest = Manifest::from_file(Path::new(manifest_file))?;
    validation::validate(&manifest)?;

    println!("validation done in {:?}", start.elapsed());

    Ok(())
}
