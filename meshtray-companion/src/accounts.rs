use meshtray_core::AccountProfile;
use meshtray_daemon::DaemonClient;
use tracing::info;

use crate::{CommandError, Companion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    AlreadyCurrent,
    Switched(AccountProfile),
}

impl<D: DaemonClient> Companion<D> {
    pub async fn current_account(&self) -> Result<String, CommandError> {
        let (current, _) = self
            .daemon
            .profile_status()
            .await
            .map_err(CommandError::DaemonUnavailable)?;
        Ok(current.name)
    }

    /// Names of every profile other than the current one, in daemon order.
    pub async fn accounts(&self) -> Result<Vec<String>, CommandError> {
        let (current, all) = self
            .daemon
            .profile_status()
            .await
            .map_err(CommandError::DaemonUnavailable)?;
        Ok(all
            .into_iter()
            .filter(|profile| profile.name != current.name)
            .map(|profile| profile.name)
            .collect())
    }

    /// Switches to the profile named `account`.
    ///
    /// The name is resolved to a profile ID from the same listing that
    /// reports the current profile, right before switching.
    pub async fn switch_to(&self, account: &str) -> Result<SwitchOutcome, CommandError> {
        let (current, all) = self
            .daemon
            .profile_status()
            .await
            .map_err(CommandError::DaemonUnavailable)?;
        if current.name == account {
            return Ok(SwitchOutcome::AlreadyCurrent);
        }

        let profile = all
            .into_iter()
            .find(|profile| profile.name == account)
            .ok_or_else(|| CommandError::ProfileNotFound(account.to_owned()))?;

        info!(account = %profile.name, id = %profile.id, "switching profile");
        self.daemon
            .switch_profile(&profile.id)
            .await
            .map_err(CommandError::DaemonUnavailable)?;
        Ok(SwitchOutcome::Switched(profile))
    }
}
