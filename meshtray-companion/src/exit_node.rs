use std::net::IpAddr;

use meshtray_core::{
    EXIT_ROUTE_V4, EXIT_ROUTE_V6, MaskedPrefs, PeerStatus, Status, exit_node_candidates,
    exit_node_ip_of_arg,
};
use meshtray_daemon::DaemonClient;
use tracing::{debug, info, warn};

use crate::{CommandError, Companion, UiEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitNodeOutcome {
    /// The peer is now the exit node, selected through `candidate`.
    Applied { candidate: String, ip: IpAddr },
    /// The peer was the exit node and no exit node is selected anymore.
    Cleared,
}

impl<D: DaemonClient> Companion<D> {
    /// Toggles the peer with `dns_name` as this node's exit node.
    ///
    /// `exit_node_connect` is emitted once the peer is found, whatever the
    /// outcome, so the UI re-renders actual state.
    pub async fn select_exit_node(&self, dns_name: &str) -> Result<ExitNodeOutcome, CommandError> {
        let status = self
            .daemon
            .status()
            .await
            .map_err(CommandError::DaemonUnavailable)?;
        let peer = status
            .peer_by_dns_name(dns_name)
            .ok_or_else(|| CommandError::PeerNotFound(dns_name.to_owned()))?;

        let result = self.negotiate_exit_node(&status, peer).await;
        self.events.emit(UiEvent::ExitNodeConnect);

        match &result {
            Ok(ExitNodeOutcome::Cleared) => self
                .notifier
                .notify(&format!("Removed exit node {}", peer.dns_name)),
            Ok(ExitNodeOutcome::Applied { .. }) => self
                .notifier
                .notify(&format!("Using {} as exit node", peer.dns_name)),
            Err(err) => warn!(peer = %peer.dns_name, "exit node change failed: {}", err),
        }
        result
    }

    async fn negotiate_exit_node(
        &self,
        status: &Status,
        peer: &PeerStatus,
    ) -> Result<ExitNodeOutcome, CommandError> {
        let (edit, outcome) = if peer.exit_node {
            info!(peer = %peer.dns_name, "clearing exit node");
            (MaskedPrefs::clear_exit_node(), ExitNodeOutcome::Cleared)
        } else {
            let (candidate, ip) = first_resolvable_candidate(peer, status)
                .ok_or_else(|| CommandError::NoResolvableCandidate(peer.dns_name.clone()))?;
            info!(peer = %peer.dns_name, %candidate, %ip, "selecting exit node");
            (
                MaskedPrefs::exit_node_ip(ip),
                ExitNodeOutcome::Applied { candidate, ip },
            )
        };

        self.daemon
            .edit_prefs(&edit)
            .await
            .map_err(CommandError::PreferenceApplyFailed)?;
        Ok(outcome)
    }

    /// Toggles advertising this node as an exit node. Returns whether the
    /// node advertises afterwards.
    pub async fn advertise_exit_node(&self, dns_name: &str) -> Result<bool, CommandError> {
        let status = self
            .daemon
            .status()
            .await
            .map_err(CommandError::DaemonUnavailable)?;
        if status.self_status.dns_name != dns_name {
            return Err(CommandError::NotSelf(dns_name.to_owned()));
        }

        let prefs = self
            .daemon
            .get_prefs()
            .await
            .map_err(CommandError::DaemonUnavailable)?;
        let advertising = prefs.advertises_exit_node();

        let mut routes: Vec<String> = prefs
            .advertise_routes
            .into_iter()
            .filter(|route| route != EXIT_ROUTE_V4 && route != EXIT_ROUTE_V6)
            .collect();
        if !advertising {
            routes.push(EXIT_ROUTE_V4.to_owned());
            routes.push(EXIT_ROUTE_V6.to_owned());
        }

        let applied = self
            .daemon
            .edit_prefs(&MaskedPrefs::advertise_routes(routes))
            .await;
        self.events.emit(UiEvent::AdvertiseExitNodeDone);
        applied.map_err(CommandError::PreferenceApplyFailed)?;

        self.notifier.notify(if advertising {
            "Removed advertising node"
        } else {
            "Advertising as exit node"
        });
        Ok(!advertising)
    }
}

fn first_resolvable_candidate(peer: &PeerStatus, status: &Status) -> Option<(String, IpAddr)> {
    exit_node_candidates(peer)
        .into_iter()
        .find_map(|candidate| match exit_node_ip_of_arg(&candidate, status) {
            Ok(ip) => Some((candidate, ip)),
            Err(err) => {
                debug!(%candidate, "exit node candidate rejected: {}", err);
                None
            }
        })
}
