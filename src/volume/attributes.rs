//! Cluster placement attributes applied with `vstorage set-attr`.

use std::ffi::OsString;

use camino::Utf8Path;

use crate::command::{CommandError, CommandRunner};

/// Applies a single cluster attribute to a path.
pub trait AttributeSetter {
    /// Sets `attribute` to `value` on `path`, recursively.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the cluster rejects the attribute.
    fn set_attribute(&self, path: &Utf8Path, attribute: &str, value: &str)
    -> Result<(), CommandError>;
}

/// [`AttributeSetter`] running `vstorage set-attr -R <path> <attr>=<value>`.
#[derive(Clone, Debug)]
pub struct VstorageAttributes<R> {
    runner: R,
    vstorage_bin: String,
}

impl<R> VstorageAttributes<R>
where
    R: CommandRunner,
{
    /// Creates a setter invoking `vstorage_bin`.
    #[must_use]
    pub fn new(runner: R, vstorage_bin: impl Into<String>) -> Self {
        Self {
            runner,
            vstorage_bin: vstorage_bin.into(),
        }
    }
}

impl<R> AttributeSetter for VstorageAttributes<R>
where
    R: CommandRunner,
{
    fn set_attribute(
        &self,
        path: &Utf8Path,
        attribute: &str,
        value: &str,
    ) -> Result<(), CommandError> {
        let args = [
            OsString::from("set-attr"),
            OsString::from("-R"),
            OsString::from(path.as_str()),
            OsString::from(format!("{attribute}={value}")),
        ];
        self.runner
            .run(&self.vstorage_bin, &args)?
            .require_success(&self.vstorage_bin, &args)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;

    #[rstest]
    #[case("replicas", "3:2")]
    #[case("failure-domain", "rack")]
    fn set_attribute_renders_key_value(#[case] attribute: &str, #[case] value: &str) {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let setter = VstorageAttributes::new(runner.clone(), "vstorage");

        setter
            .set_attribute(Utf8Path::new("/mnt/c1/pool/vol"), attribute, value)
            .unwrap_or_else(|err| panic!("set_attribute: {err}"));

        let invocations = runner.invocations();
        let call = invocations.first().unwrap_or_else(|| panic!("no invocation"));
        assert_eq!(
            call.command_string(),
            format!("vstorage set-attr -R /mnt/c1/pool/vol {attribute}={value}")
        );
    }

    #[rstest]
    fn set_attribute_surfaces_stderr() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "tier 9 is not configured\n");
        let setter = VstorageAttributes::new(runner, "vstorage");

        let err = setter
            .set_attribute(Utf8Path::new("/mnt/c1/pool/vol"), "tier", "9")
            .expect_err("attribute should be rejected");
        assert!(
            err.to_string().contains("tier 9 is not configured"),
            "unexpected error: {err}"
        );
    }
}
