//! Finding Cast receivers on the local network with mDNS.

use anyhow::format_err;
use crate::{
    error::{Error, Result},
    util::named,
};
use futures::{StreamExt, TryStreamExt};
use ::mdns::{self as mdns_lib, RecordKind};
use std::{
    collections::{BTreeMap, HashMap},
    net::{IpAddr, SocketAddr},
    time::Duration,
};
use tokio::pin;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Device {
    pub addr: SocketAddr,
    pub service_host: String,
    pub display_name: String,
    pub app_name: Option<String>,
    pub uuid: Option<String>,
}

pub const SERVICE_NAME: &str = "_googlecast._tcp.local";

pub const DEFAULT_DISCOVER_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_DISCOVER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub enum Target {
    First,
    DisplayName(String),
    Id(String),
}

impl Target {
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            Target::First => true,
            Target::DisplayName(name) => &device.display_name == name,
            Target::Id(id) => device.uuid.as_ref() == Some(id),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum RecordKindVariant {
    A,
    PTR,
    SRV,
    TXT,
}

impl RecordKindVariant {
    fn from_kind(rk: &RecordKind) -> Option<RecordKindVariant> {
        Some(match rk {
            RecordKind::A(_)       => RecordKindVariant::A,
            RecordKind::PTR(_)     => RecordKindVariant::PTR,
            RecordKind::SRV { .. } => RecordKindVariant::SRV,
            RecordKind::TXT(_)     => RecordKindVariant::TXT,
            _ => return None,
        })
    }
}

fn mdns_error(err: mdns_lib::Error) -> Error {
    Error::Other(format_err!("mdns: {err:?}"))
}

/// First device matching `target` within `timeout`.
///
/// Fails with `NoDevicesFound` when the window closes without a match.
#[tracing::instrument(level = "debug", ret, err)]
pub async fn resolve(target: &Target, timeout: Duration) -> Result<Device> {
    let deadline = tokio::time::Instant::now() + timeout;

    let discover_stream = mdns_lib::discover::all(SERVICE_NAME, DEFAULT_DISCOVER_INTERVAL)
        .map_err(mdns_error)?
        .initial_send(true)
        .listen()
        .map_err(mdns_error)
        .try_filter_map(|resp: mdns_lib::Response| {
            let device = devices_from_mdns_response(&resp).into_iter()
                .find(|device| target.matches(device));
            futures::future::ready(Ok(device))
        });

    pin!(discover_stream);

    match tokio::time::timeout_at(deadline, discover_stream.try_next()).await {
        Ok(Ok(Some(device))) => Ok(device),
        Ok(Ok(None)) | Err(_) => Err(Error::NoDevicesFound),
        Ok(Err(err)) => Err(err),
    }
}

/// Every device answering within `timeout`, deduplicated by service host.
pub async fn discover(timeout: Duration) -> Result<Vec<Device>> {
    let deadline = tokio::time::Instant::now() + timeout;

    let discover_stream = mdns_lib::discover::all(SERVICE_NAME, DEFAULT_DISCOVER_INTERVAL)
        .map_err(mdns_error)?
        .initial_send(true)
        .listen();
    pin!(discover_stream);

    let mut devices = HashMap::<String, Device>::new();
    while let Ok(Some(resp)) = tokio::time::timeout_at(deadline, discover_stream.next()).await {
        match resp {
            Ok(resp) => {
                for device in devices_from_mdns_response(&resp) {
                    devices.insert(device.service_host.clone(), device);
                }
            },
            Err(err) => tracing::warn!(?err, "mdns receive error"),
        }
    }

    if devices.is_empty() {
        return Err(Error::NoDevicesFound);
    }

    let mut devices: Vec<Device> = devices.into_values().collect();
    devices.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    Ok(devices)
}

/// Devices described by the PTR, TXT, SRV and A records of one response.
#[named]
pub fn devices_from_mdns_response(resp: &mdns_lib::Response) -> Vec<Device> {
    const FUNCTION_PATH: &str = function_path!();

    tracing::trace!(target: FUNCTION_PATH,
                    { "answers.len" = resp.answers.len(),
                    "additional.len" = resp.additional.len() },
                    "mdns::Response");

    // Map from record name and variant to records.
    let mut recs = BTreeMap::<(String, RecordKindVariant), Vec<&mdns_lib::Record>>::new();

    for rec in resp.answers.iter().chain(resp.additional.iter()) {
        let Some(kind) = RecordKindVariant::from_kind(&rec.kind) else {
            continue;
        };

        recs.entry((rec.name.clone(), kind)).or_default().push(rec);
    }

    let records = |name: &str, kind: RecordKindVariant| {
        recs.get(&(name.to_string(), kind)).into_iter().flatten()
    };

    let mut devices = Vec::new();

    for ptr_rec in records(SERVICE_NAME, RecordKindVariant::PTR) {
        let RecordKind::PTR(ref service_host) = ptr_rec.kind else {
            continue;
        };

        let mut app_name = None::<String>;
        let mut friendly_name = None::<String>;
        let mut uuid = None::<String>;

        let txt_entries = records(service_host, RecordKindVariant::TXT)
            .find_map(|rec| match &rec.kind {
                RecordKind::TXT(entries) => Some(entries),
                _ => None,
            });

        for entry in txt_entries.into_iter().flatten() {
            let Some((k, v)) = entry.split_once('=') else {
                continue;
            };

            match k {
                "fn" => friendly_name = Some(v.to_string()),
                "rs" => app_name = Some(v.to_string()),
                "id" => uuid = Some(v.to_string()),
                _ => (),
            };
        }

        let srv = records(service_host, RecordKindVariant::SRV)
            .find_map(|rec| match &rec.kind {
                RecordKind::SRV { target, port, .. } => Some((target.as_str(), *port)),
                _ => None,
            });

        let Some((target, port)) = srv else {
            tracing::trace!(target: FUNCTION_PATH, service_host, "no SRV record");
            continue;
        };

        let ip = records(target, RecordKindVariant::A)
            .find_map(|rec| match &rec.kind {
                RecordKind::A(ipv4) => Some(IpAddr::from(*ipv4)),
                _ => None,
            });

        let Some(ip) = ip else {
            tracing::trace!(target: FUNCTION_PATH, service_host, target, "no A record");
            continue;
        };

        let device = Device {
            addr: SocketAddr::from((ip, port)),
            service_host: service_host.to_string(),
            display_name: friendly_name.unwrap_or_else(|| format!("{ip}:{port}")),
            app_name,
            uuid,
        };

        tracing::trace!(target: FUNCTION_PATH, ?device, "device");

        devices.push(device);
    }

    devices
}
