use std::collections::BTreeSet;
use std::path::Path;

use realmd_common::error::RealmError;

use crate::diagnostics::Invocation;
use crate::tools::Tools;

/// Resolve package sets into the packages they name and whether any of them are missing.
/// A package with no required file is always considered missing.
fn resolve(tools: &Tools, sets: &[&str]) -> (Vec<String>, bool) {
    let mut packages = BTreeSet::new();
    let mut missing = false;
    for set in sets {
        let Some(entries) = tools.config.packages.get(*set) else {
            warn!(%set, "unknown package set");
            continue;
        };
        for (package, file) in entries.iter() {
            packages.insert(package.clone());
            if file.trim().is_empty() || !Path::new(file).exists() {
                missing = true;
            }
        }
    }
    (packages.into_iter().collect(), missing)
}

/// Make sure the software for the given package sets is installed.
#[instrument(level = "debug", skip(tools, inv))]
pub async fn install(
    tools: &Tools,
    sets: &[&str],
    automatic_install: Option<bool>,
    inv: &Invocation,
) -> Result<(), RealmError> {
    if tools.config.install_mode {
        debug!("install mode, assuming packages are present");
        return Ok(());
    }

    let (packages, missing) = resolve(tools, sets);
    if packages.is_empty() || !missing {
        inv.info("Required packages are already installed");
        return Ok(());
    }

    if !automatic_install.unwrap_or(tools.config.automatic_install) {
        return Err(RealmError::Failed(format!(
            "Necessary packages are not installed: {}",
            packages.join(", ")
        )));
    }

    inv.info(format!("Installing necessary packages: {}", packages.join(", ")));
    let out = tools
        .runner
        .run_known("install-packages", &packages, &[], None, inv)
        .await?;
    if out.success() {
        Ok(())
    } else {
        Err(RealmError::Failed(format!(
            "Couldn't install packages: {}",
            packages.join(", ")
        )))
    }
}
