use crate::errors::SupError;
use crate::utils::retry::{self, Policy};
use crate::utils::shell::Executor;

/// Loads the kernel modules cryptsetup needs
pub fn load_modules(exec: &dyn Executor) -> Result<(), SupError> {
    exec.exec(&["modprobe", "-a", "dm-crypt", "aes", "sha256"])
        .map(|_| ())
}

/// Executes, retrying while the device is not yet visible:
/// ```shell
/// cryptsetup --batch-mode luksFormat ${{ device }}
/// ```
/// The passphrase is read from the terminal.
pub fn format(exec: &dyn Executor, device: &str, policy: Policy) -> Result<(), SupError> {
    retry::retry_device(device, policy, || {
        exec.exec(&["cryptsetup", "--batch-mode", "luksFormat", device])
            .map(|_| ())
    })
}

/// Executes:
/// ```shell
/// cryptsetup open --type luks ${{ device }} ${{ name }}
/// ```
pub fn open(exec: &dyn Executor, device: &str, name: &str) -> Result<(), SupError> {
    exec.exec(&["cryptsetup", "open", "--type", "luks", device, name])
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::utils::shell::test_utils::{FakeExec, Reply};

    #[test]
    fn test_format_retries_transient() {
        let exec = FakeExec::new()
            .once("cryptsetup", Reply::Fail { code: 4, output: "no such device".into() })
            .once("cryptsetup", Reply::Fail { code: 5, output: String::new() });

        format(&exec, "/dev/sda2", Policy::new(10, Duration::ZERO)).unwrap();

        assert_eq!(3, exec.calls().len());
    }

    #[test]
    fn test_format_fatal() {
        let exec = FakeExec::new().always("cryptsetup", Reply::Fail { code: 2, output: String::new() });

        assert!(format(&exec, "/dev/sda2", Policy::new(10, Duration::ZERO)).is_err());
        assert_eq!(1, exec.calls().len());
    }
}
