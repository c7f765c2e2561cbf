use crate::errors::SupError;

/// Command creating filesystem `fs` on `device`.
///
/// - `fat32` (any `fatNN`) => `mkfs.fat -F 32 [-n ${{ label }}] ${{ device }}`
/// - `swap` => `mkswap [-L ${{ label }}] ${{ device }}`
/// - anything else => `mkfs.${{ fs }} [-L ${{ label }}] ${{ device }}`
pub fn format_cmd(fs: &str, device: &str, label: Option<&str>) -> Result<Vec<String>, SupError> {
    let fs = fs.trim().to_lowercase();

    let mut cmd: Vec<String> = if let Some(bits) = fs.strip_prefix("fat") {
        if bits.is_empty() || !bits.chars().all(|c| c.is_ascii_digit()) {
            return Err(SupError::BadManifest(format!("invalid fs type: {fs}")));
        }

        vec!["mkfs.fat".into(), "-F".into(), bits.to_string()]
    } else if fs == "swap" {
        vec!["mkswap".into()]
    } else if fs.is_empty() || fs.contains(char::is_whitespace) {
        return Err(SupError::BadManifest(format!("invalid fs type: {fs:?}")));
    } else {
        vec![format!("mkfs.{fs}")]
    };

    if let Some(label) = label {
        let flag = if cmd[0] == "mkfs.fat" { "-n" } else { "-L" };
        cmd.extend([flag.to_string(), label.to_string()]);
    }

    cmd.push(device.to_string());
    Ok(cmd)
}
