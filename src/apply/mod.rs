//! Destructive disk work done before a root exists
mod disks;

pub use disks::prepare_disks;
