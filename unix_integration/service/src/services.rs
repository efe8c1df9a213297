use realmd_common::error::RealmError;

use crate::diagnostics::Invocation;
use crate::tools::Tools;

async fn service_command(
    tools: &Tools,
    command: &str,
    service: &str,
    failure: &str,
    inv: &Invocation,
) -> Result<(), RealmError> {
    let unit = tools.config.service_unit(service).to_string();
    let out = tools
        .runner
        .run_known(command, &[unit.clone()], &[], None, inv)
        .await?;
    if out.success() {
        Ok(())
    } else {
        Err(RealmError::Internal(format!("{}: {}", failure, unit)))
    }
}

pub async fn enable_and_restart(
    tools: &Tools,
    service: &str,
    inv: &Invocation,
) -> Result<(), RealmError> {
    service_command(tools, "service-enable", service, "Couldn't enable service", inv).await?;
    service_command(tools, "service-restart", service, "Couldn't restart service", inv).await
}

pub async fn disable_and_stop(
    tools: &Tools,
    service: &str,
    inv: &Invocation,
) -> Result<(), RealmError> {
    service_command(tools, "service-disable", service, "Couldn't disable service", inv).await?;
    service_command(tools, "service-stop", service, "Couldn't stop service", inv).await
}

pub async fn restart(tools: &Tools, service: &str, inv: &Invocation) -> Result<(), RealmError> {
    service_command(tools, "service-restart", service, "Couldn't restart service", inv).await
}
