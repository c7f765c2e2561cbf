use std::path::Path;

use crate::apply;
use crate::cli;
use crate::distro::{self, common, Distro, Installer};
use crate::entity::report::{Report, Step};
use crate::errors::SupError;
use crate::manifest::{validation, Manifest};
use crate::utils::fs;
use crate::utils::retry::Policy;
use crate::utils::shell::Shell;

pub(super) fn run(cli: &cli::Cli, args: &cli::ArgsInstall) -> Result<Report, SupError> {
    let start = std::time::Instant::now();

    let manifest = Manifest::from_file(Path::new(&cli.manifest))?;
    if !args.no_validate {
        validation::validate(&manifest)?;
    }

    let steps = args.selected_steps();
    if steps.contains(&Step::Prepdisks) && !args.overwrite {
        return Err(SupError::BadArgs(
            "prepdisks erases every disk in the manifest, pass --overwrite to allow it".to_string(),
        ));
    }

    let kconfig = match &args.kconfig {
        Some(path) => Some(fs::read(Path::new(path))?),
        None => None,
    };

    let location = manifest.resolve_mount_point(cli.mount_point.as_deref());
    tracing::info!("installing {:?} to {location}", manifest.distro);

    let shell = Shell;
    let mut inst = Installer::new(&shell, &manifest, Path::new(&location));
    inst.no_chroot = cli.no_chroot;
    inst.kconfig = kconfig;

    let mut distro = distro::new_distro(manifest.distro, &manifest);
    let result = install(distro.as_mut(), &mut inst, &steps, Policy::device());

    let report = |steps: Vec<Step>| Report {
        location: location.clone(),
        distro: distro.name().to_string(),
        steps,
        modified: inst.modified(),
        duration: start.elapsed(),
    };

    match result {
        Ok(performed) => Ok(report(performed)),
        Err(err) => {
            if let SupError::InstallError { steps_performed, .. } = &err {
                println!("{}", report(steps_performed.clone()).to_json_string());
            }

            Err(err)
        }
    }
}

/// Steps that run inside the new root
fn needs_chroot(step: Step) -> bool {
    !matches!(step, Step::Prepdisks | Step::Bootstrap | Step::Setupenv)
}

/// Runs `steps` in order, stopping at the first failure.
/// Failures are wrapped in `InstallError` along with the steps already done.
/// The chroot, once entered, is kept until the process exits.
pub fn install(
    distro: &mut dyn Distro,
    inst: &mut Installer,
    steps: &[Step],
    device_policy: Policy,
) -> Result<Vec<Step>, SupError> {
    let mut performed = Vec::new();

    for &step in steps {
        tracing::info!("running step {step}");

        if let Err(err) = run_step(distro, inst, step, device_policy) {
            return Err(SupError::InstallError {
                error: Box::new(err),
                step_failed: step,
                steps_performed: performed,
            });
        }

        performed.push(step);
    }

    Ok(performed)
}

fn run_step(
    distro: &mut dyn Distro,
    inst: &mut Installer,
    step: Step,
    device_policy: Policy,
) -> Result<(), SupError> {
    if needs_chroot(step) {
        distro.ensure_chroot(inst)?;
    }

    match step {
        Step::Prepdisks => apply::prepare_disks(inst, device_policy),
        Step::Bootstrap => distro.bootstrap(inst),
        Step::Setupenv => distro.setup_environment(inst),
        Step::ConfigPkgmgr => distro.config_package_manager(inst),
        Step::Sysconf => distro.config_system(inst),
        Step::UpdateWorld => distro.update_world(inst),
        Step::Kernel => distro.build_kernel(inst),
        Step::Fstab => common::write_fstab(inst),
        Step::Packages => common::install_misc_packages(distro, inst),
        Step::RemovePackages => common::remove_misc_packages(distro, inst),
        Step::Network => distro.config_network(inst),
        Step::Services => common::install_services(inst),
        Step::Bootloader => distro.config_boot_loader(inst),
        Step::MiscConfig => common::misc_config(inst),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distro::tests::{get, put, test_installer};
    use crate::utils::shell::test_utils::FakeExec;

    const MANIFEST: &str = r#"
distro: gentoo
sysconfig:
  init: openrc
services: [lvm, sshd]
misc_config:
  - path: /etc/lvm/lvm.conf
    sections:
      - name: devices
        values: [[issue_discards, "1"]]
"#;

    #[test]
    fn test_install_partial_failure() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let exec = FakeExec::new();
        let dir = tempfile::tempdir().unwrap();
        put(dir.path(), "/etc/fstab", "# static file system information\n");
        let mut inst = test_installer(&exec, &manifest, dir.path());
        let mut distro = distro::new_distro(manifest.distro, &manifest);

        // lvm.conf does not exist yet
        let err = install(
            distro.as_mut(),
            &mut inst,
            &[Step::Fstab, Step::Services, Step::MiscConfig],
            Policy::device(),
        )
        .unwrap_err();

        match err {
            SupError::InstallError {
                step_failed,
                steps_performed,
                ..
            } => {
                assert_eq!(step_failed, Step::MiscConfig);
                assert_eq!(steps_performed, vec![Step::Fstab, Step::Services]);
            }
            err => panic!("unexpected error {err}"),
        }

        assert!(exec.called("rc-update add lvm default"));
        assert!(exec.called("rc-update add sshd default"));
    }

    #[test]
    fn test_install_steps() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let exec = FakeExec::new();
        let dir = tempfile::tempdir().unwrap();
        put(dir.path(), "/etc/lvm/lvm.conf", "devices {\n}\n");
        let mut inst = test_installer(&exec, &manifest, dir.path());
        let mut distro = distro::new_distro(manifest.distro, &manifest);

        let performed = install(
            distro.as_mut(),
            &mut inst,
            &[Step::Services, Step::MiscConfig],
            Policy::device(),
        )
        .unwrap();

        assert_eq!(performed, vec![Step::Services, Step::MiscConfig]);
        assert!(inst.chroot.is_inside());
        assert!(get(dir.path(), "/etc/lvm/lvm.conf").contains("issue_discards = 1"));
        assert_eq!(
            inst.modified(),
            vec![dir.path().join("etc/lvm/lvm.conf")],
        );
        // First entry into the gentoo root refreshes its environment
        assert_eq!(exec.calls()[0], "env-update");
    }

    #[test]
    fn test_chroot_steps() {
        assert!(!needs_chroot(Step::Prepdisks));
        assert!(!needs_chroot(Step::Setupenv));
        assert!(needs_chroot(Step::ConfigPkgmgr));
        assert!(needs_chroot(Step::MiscConfig));
    }
}
