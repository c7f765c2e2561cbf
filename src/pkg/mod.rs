pub mod pacman;
pub mod portage;
pub mod resolver;

/// Builds package transaction command lines for one distro's package manager
pub trait PackageManager {
    fn name(&self) -> &'static str;

    fn install_cmd(&self, names: &[&str], flags: &[&str]) -> Vec<String>;

    fn remove_cmd(&self, names: &[&str], flags: &[&str]) -> Vec<String>;
}

fn argv(head: &[&str], flags: &[&str], names: &[&str]) -> Vec<String> {
    head.iter()
        .chain(flags)
        .chain(names)
        .map(|s| s.to_string())
        .collect()
}
