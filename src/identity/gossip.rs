use anyhow::{Context, Result, bail};
use log::trace;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use url::Url;

/// Usual path of the ring status endpoint exposed by the data store's admin agent.
///
/// This sidecar does not serve it; the probe must point at the agent.
pub const DEFAULT_STATUS_PATH: &str = "/v1/cassadmin/status";

/// Rejects a status endpoint on the sidecar's own port: every probe would get a 404
/// and be counted as an unreachable node.
pub fn check_status_endpoint(sidecar_port: u16, status_port: u16) -> Result<()> {
    if sidecar_port == status_port {
        bail!(
            "gossip status port {status_port} is the sidecar's own port, not the ring status endpoint"
        );
    }

    Ok(())
}

/// Fetches the raw ring status payload from the node at an address.
pub trait GossipProbe {
    fn fetch_status(&self, ip: IpAddr) -> impl Future<Output = Result<String>> + Send;
}

/// The ring's own view of itself, as reported by one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipStatus {
    live: HashSet<IpAddr>,
    token_owners: HashMap<String, IpAddr>,
}

#[derive(Deserialize)]
struct StatusPayload {
    live: Vec<String>,
    #[serde(rename = "tokenToEndpointMap")]
    token_to_endpoint_map: HashMap<String, String>,
}

// Endpoints can be rendered as `/10.0.0.1` or `host/10.0.0.1`
fn parse_endpoint(endpoint: &str) -> Result<IpAddr> {
    let address = endpoint.rsplit('/').next().unwrap_or(endpoint).trim();

    address
        .parse()
        .with_context(|| format!("invalid endpoint address '{endpoint}'"))
}

impl GossipStatus {
    /// Parses a status payload.
    ///
    /// Both `live` and `tokenToEndpointMap` must be present; empty collections are
    /// a valid (structured) answer, anything else is malformed.
    pub fn parse(raw: &str) -> Result<Self> {
        let payload: StatusPayload =
            serde_json::from_str(raw).context("malformed gossip status payload")?;

        let live: HashSet<IpAddr> = payload
            .live
            .iter()
            .map(|endpoint| parse_endpoint(endpoint))
            .collect::<Result<_>>()?;

        let token_owners: HashMap<String, IpAddr> = payload
            .token_to_endpoint_map
            .into_iter()
            .map(|(token, endpoint)| Ok((token, parse_endpoint(&endpoint)?)))
            .collect::<Result<_>>()?;

        Ok(Self { live, token_owners })
    }

    pub fn is_live(&self, ip: IpAddr) -> bool {
        self.live.contains(&ip)
    }

    pub fn owner_of(&self, token: &str) -> Option<IpAddr> {
        self.token_owners.get(token).copied()
    }
}

/// [`GossipProbe`] over the sidecars' HTTP status endpoint.
pub struct HttpGossipProbe {
    client: Client,
    port: u16,
    path: String,
    timeout: Duration,
}

impl HttpGossipProbe {
    pub fn new(port: u16, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            port,
            path: path.into(),
            timeout,
        }
    }

    fn status_url(&self, ip: IpAddr) -> Result<Url> {
        let base: Url = format!("http://{}/", SocketAddr::new(ip, self.port)).parse()?;
        Ok(base.join(&self.path)?)
    }
}

impl GossipProbe for HttpGossipProbe {
    async fn fetch_status(&self, ip: IpAddr) -> Result<String> {
        let url = self.status_url(ip)?;
        trace!("Fetching gossip status from {url}");

        let body = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(body)
    }
}

#[cfg(test)]
pub fn status_payload(live: &[&str], token_owners: &[(&str, &str)]) -> String {
    let token_owners: HashMap<_, _> = token_owners.iter().copied().collect();

    serde_json::json!({
        "live": live,
        "tokenToEndpointMap": token_owners,
    })
    .to_string()
}
