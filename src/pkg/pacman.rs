use super::{argv, PackageManager};

pub struct Pacman;

impl PackageManager for Pacman {
    fn name(&self) -> &'static str {
        "pacman"
    }

    fn install_cmd(&self, names: &[&str], flags: &[&str]) -> Vec<String> {
        let mut cmd = argv(&["pacman", "--noconfirm"], flags, &[]);
        cmd.push("-S".to_string());
        cmd.extend(names.iter().map(|s| s.to_string()));
        cmd
    }

    fn remove_cmd(&self, names: &[&str], flags: &[&str]) -> Vec<String> {
        let mut cmd = argv(&["pacman", "--noconfirm"], flags, &[]);
        cmd.push("-R".to_string());
        cmd.extend(names.iter().map(|s| s.to_string()));
        cmd
    }
}
