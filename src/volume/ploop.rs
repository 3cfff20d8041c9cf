//! Ploop image management through the `ploop` command-line tool.

use std::ffi::OsString;

use camino::Utf8Path;

use crate::command::{CommandError, CommandRunner};

/// Creates and deletes ploop volumes.
pub trait PloopDriver {
    /// Creates a volume of `size_kib` KiB in `volume_dir`, with its delta
    /// image at `image`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the volume cannot be created.
    fn create(&self, volume_dir: &Utf8Path, size_kib: u64, image: &Utf8Path)
    -> Result<(), CommandError>;

    /// Deletes the volume in `volume_dir` together with its images.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the volume cannot be deleted.
    fn delete(&self, volume_dir: &Utf8Path) -> Result<(), CommandError>;
}

/// [`PloopDriver`] that shells out to `ploop volume`.
#[derive(Clone, Debug)]
pub struct PloopCli<R> {
    runner: R,
    ploop_bin: String,
}

impl<R> PloopCli<R>
where
    R: CommandRunner,
{
    /// Creates a driver invoking `ploop_bin`.
    #[must_use]
    pub fn new(runner: R, ploop_bin: impl Into<String>) -> Self {
        Self {
            runner,
            ploop_bin: ploop_bin.into(),
        }
    }

    fn volume(&self, args: &[OsString]) -> Result<(), CommandError> {
        self.runner
            .run(&self.ploop_bin, args)?
            .require_success(&self.ploop_bin, args)
            .map(|_| ())
    }
}

impl<R> PloopDriver for PloopCli<R>
where
    R: CommandRunner,
{
    fn create(
        &self,
        volume_dir: &Utf8Path,
        size_kib: u64,
        image: &Utf8Path,
    ) -> Result<(), CommandError> {
        self.volume(&[
            OsString::from("volume"),
            OsString::from("create"),
            OsString::from("-s"),
            OsString::from(format!("{size_kib}K")),
            OsString::from("--image"),
            OsString::from(image.as_str()),
            OsString::from(volume_dir.as_str()),
        ])
    }

    fn delete(&self, volume_dir: &Utf8Path) -> Result<(), CommandError> {
        self.volume(&[
            OsString::from("volume"),
            OsString::from("delete"),
            OsString::from(volume_dir.as_str()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;

    #[rstest]
    fn create_passes_size_in_kib_and_image() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let driver = PloopCli::new(runner.clone(), "ploop");

        driver
            .create(
                Utf8Path::new("/mnt/c1/pool/vol"),
                10_485_760,
                Utf8Path::new("/mnt/c1/deltas/vol.image"),
            )
            .unwrap_or_else(|err| panic!("create: {err}"));

        let commands: Vec<String> = runner
            .invocations()
            .iter()
            .map(|call| call.command_string())
            .collect();
        assert_eq!(
            commands,
            vec![String::from(
                "ploop volume create -s 10485760K --image /mnt/c1/deltas/vol.image /mnt/c1/pool/vol"
            )]
        );
    }

    #[rstest]
    fn delete_reports_non_zero_exit() {
        let runner = ScriptedRunner::new();
        runner.push_failure(2);
        let driver = PloopCli::new(runner, "ploop");

        let err = driver
            .delete(Utf8Path::new("/mnt/c1/pool/vol"))
            .expect_err("delete should fail");
        assert!(
            matches!(err, CommandError::Failed { status: Some(2), .. }),
            "unexpected error: {err}"
        );
    }
}
