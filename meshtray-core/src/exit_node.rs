use std::net::IpAddr;

use crate::{CoreError, PeerStatus, Status};

pub const EXIT_ROUTE_V4: &str = "0.0.0.0/0";
pub const EXIT_ROUTE_V6: &str = "::/0";

pub fn contains_exit_routes(routes: &[String]) -> bool {
    routes.iter().any(|r| r == EXIT_ROUTE_V4) && routes.iter().any(|r| r == EXIT_ROUTE_V6)
}

/// Identifier forms to try when selecting `peer` as exit node, in order:
/// DNS name, host name, then each mesh IP.
pub fn exit_node_candidates(peer: &PeerStatus) -> Vec<String> {
    let mut candidates = vec![peer.dns_name.clone(), peer.host_name.clone()];
    candidates.extend(peer.mesh_ips.iter().map(IpAddr::to_string));
    candidates
}

/// Strips a trailing root dot and then `suffix` from a DNS name, if present.
pub fn trim_dns_suffix<'a>(name: &'a str, suffix: &str) -> &'a str {
    let name = name.strip_suffix('.').unwrap_or(name);
    let suffix = suffix.trim_matches('.');
    if suffix.is_empty() || name.len() <= suffix.len() {
        return name;
    }

    let split = name.len() - suffix.len();
    if !name.is_char_boundary(split) {
        return name;
    }
    let (base, tail) = name.split_at(split);
    match base.strip_suffix('.') {
        Some(base) if tail.eq_ignore_ascii_case(suffix) => base,
        _ => name,
    }
}

/// Resolves an exit-node argument (IP, base name or full DNS name) into the
/// mesh IP the daemon should route through.
///
/// An IP is checked against the peer list only while the backend is running;
/// a name must match exactly one peer that has a mesh IP and offers exit-node
/// service.
pub fn exit_node_ip_of_arg(arg: &str, status: &Status) -> Result<IpAddr, CoreError> {
    if arg.is_empty() {
        return Err(CoreError::EmptyExitNodeArg);
    }

    if let Ok(ip) = arg.parse::<IpAddr>() {
        if !status.is_running() {
            return Ok(ip);
        }
        let owner = status
            .peer_order()
            .find(|peer| peer.mesh_ips.contains(&ip))
            .ok_or(CoreError::UnknownPeerIp(ip))?;
        if !owner.exit_node_option {
            return Err(CoreError::NotExitNode(ip));
        }
        return Ok(ip);
    }

    let mut matched = None;
    let mut matches = 0;
    for peer in status.peer_order() {
        let base_name = trim_dns_suffix(&peer.dns_name, &status.magic_dns_suffix);
        if !arg.eq_ignore_ascii_case(base_name) && !arg.eq_ignore_ascii_case(&peer.dns_name) {
            continue;
        }
        matches += 1;
        let ip = *peer
            .mesh_ips
            .first()
            .ok_or_else(|| CoreError::NoMeshIp(arg.to_owned()))?;
        if !peer.exit_node_option {
            return Err(CoreError::NotAdvertisingExitNode(arg.to_owned()));
        }
        matched = Some(ip);
    }

    match (matches, matched) {
        (1, Some(ip)) => Ok(ip),
        (0, _) | (_, None) => Err(CoreError::NoMatchingNode(arg.to_owned())),
        _ => Err(CoreError::AmbiguousNode(arg.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn exit_peer(dns_name: &str, host_name: &str, ips: &[&str], capable: bool) -> PeerStatus {
        PeerStatus {
            dns_name: dns_name.to_owned(),
            host_name: host_name.to_owned(),
            mesh_ips: ips.iter().map(|s| ip(s)).collect(),
            exit_node_option: capable,
            ..PeerStatus::default()
        }
    }

    fn running(peers: Vec<PeerStatus>) -> Status {
        Status {
            backend_state: "Running".to_owned(),
            magic_dns_suffix: "t1.net".to_owned(),
            peers: peers
                .into_iter()
                .enumerate()
                .map(|(i, p)| (format!("nodekey:{i:02}"), p))
                .collect(),
            ..Status::default()
        }
    }

    #[test]
    fn candidates_follow_dns_host_then_ips() {
        let peer = exit_peer("bob.t1.net.", "bob-laptop", &["100.64.0.2", "fd7a::2"], true);
        assert_eq!(
            exit_node_candidates(&peer),
            vec!["bob.t1.net.", "bob-laptop", "100.64.0.2", "fd7a::2"]
        );
    }

    #[test]
    fn trims_magic_dns_suffix() {
        assert_eq!(trim_dns_suffix("bob.t1.net.", "t1.net"), "bob");
        assert_eq!(trim_dns_suffix("bob.T1.NET", ".t1.net."), "bob");
        assert_eq!(trim_dns_suffix("bob.other.net.", "t1.net"), "bob.other.net");
        assert_eq!(trim_dns_suffix("t1.net", "t1.net"), "t1.net");
    }

    #[test]
    fn resolves_by_full_and_base_name() {
        let status = running(vec![exit_peer("bob.t1.net.", "bob", &["100.64.0.2"], true)]);
        assert_eq!(exit_node_ip_of_arg("bob.t1.net.", &status), Ok(ip("100.64.0.2")));
        assert_eq!(exit_node_ip_of_arg("BOB", &status), Ok(ip("100.64.0.2")));
    }

    #[test]
    fn rejects_peer_without_capability() {
        let status = running(vec![exit_peer("bob.t1.net.", "bob", &["100.64.0.2"], false)]);
        assert_eq!(
            exit_node_ip_of_arg("bob", &status),
            Err(CoreError::NotAdvertisingExitNode("bob".to_owned()))
        );
        assert_eq!(
            exit_node_ip_of_arg("100.64.0.2", &status),
            Err(CoreError::NotExitNode(ip("100.64.0.2")))
        );
    }

    #[test]
    fn ip_is_unchecked_while_not_running() {
        let mut status = running(vec![]);
        status.backend_state = "Stopped".to_owned();
        assert_eq!(exit_node_ip_of_arg("100.64.0.9", &status), Ok(ip("100.64.0.9")));

        status.backend_state = "Running".to_owned();
        assert_eq!(
            exit_node_ip_of_arg("100.64.0.9", &status),
            Err(CoreError::UnknownPeerIp(ip("100.64.0.9")))
        );
    }

    #[test]
    fn empty_unknown_and_ambiguous_names_fail() {
        let status = running(vec![
            exit_peer("dup.t1.net.", "dup", &["100.64.0.3"], true),
            exit_peer("dup.t1.net.", "dup", &["100.64.0.4"], true),
            exit_peer("noip.t1.net.", "noip", &[], true),
        ]);
        assert_eq!(exit_node_ip_of_arg("", &status), Err(CoreError::EmptyExitNodeArg));
        assert_eq!(
            exit_node_ip_of_arg("ghost", &status),
            Err(CoreError::NoMatchingNode("ghost".to_owned()))
        );
        assert_eq!(
            exit_node_ip_of_arg("dup", &status),
            Err(CoreError::AmbiguousNode("dup".to_owned()))
        );
        assert_eq!(
            exit_node_ip_of_arg("noip", &status),
            Err(CoreError::NoMeshIp("noip".to_owned()))
        );
    }
}
