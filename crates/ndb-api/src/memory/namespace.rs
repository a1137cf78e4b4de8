// ── Simulated network namespace ──
//
// Kernel-like bookkeeping for links, addresses, routes, and neighbours.
// Every accepted request mutates the state and broadcasts the resulting
// events while the state lock is still held, so all subscribers observe
// changes in the order they were applied.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::errno::{
    EADDRNOTAVAIL, EEXIST, EINVAL, ENETUNREACH, ENODEV, ENOENT, EOPNOTSUPP, ESRCH,
};
use crate::error::Error;
use crate::message::{Event, Kind, Request, RequestAction};
use crate::value::{Attrs, Value};

const EVENT_BUFFER: usize = 4096;

const LINK_KINDS: &[&str] = &["dummy", "bridge", "bond", "vlan"];
const MASTER_KINDS: &[&str] = &["bridge", "bond"];

const AF_INET: i64 = 2;
const AF_INET6: i64 = 10;

const RT_TABLE_MAIN: i64 = 254;
const RTPROT_BOOT: i64 = 3;
const RT_SCOPE_UNIVERSE: i64 = 0;
const RT_SCOPE_LINK: i64 = 253;
const RT_SCOPE_HOST: i64 = 254;

const ETH_P_8021Q: i64 = 0x8100;
const ETH_P_8021AD: i64 = 0x88a8;

type AddrKey = (i64, String, i64);
type RouteKey = (i64, String, i64);
type NeighKey = (i64, String);

/// Shared handle to one simulated namespace. Cheap to clone; every clone
/// and every [`MemoryChannel`](super::MemoryChannel) attached to it sees
/// the same state.
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    events: broadcast::Sender<Event>,
}

#[derive(Default)]
struct State {
    next_index: i64,
    links: BTreeMap<i64, Attrs>,
    addresses: BTreeMap<AddrKey, Attrs>,
    routes: BTreeMap<RouteKey, Attrs>,
    neighbours: BTreeMap<NeighKey, Attrs>,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl Namespace {
    /// A fresh namespace holding only the loopback interface.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_event_buffer(name, EVENT_BUFFER)
    }

    /// Like [`new`](Self::new), keeping at most `capacity` undelivered
    /// events per subscriber before it lags.
    pub fn with_event_buffer(name: impl Into<String>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let mut state = State {
            next_index: 2,
            ..State::default()
        };

        state.links.insert(
            1,
            Attrs::new()
                .with("index", 1)
                .with("ifname", "lo")
                .with("kind", "loopback")
                .with("state", "up")
                .with("address", "00:00:00:00:00:00")
                .with("mtu", 65536)
                .with("master", Value::Null)
                .with("link", Value::Null),
        );
        state.addresses.insert(
            (1, "127.0.0.1".into(), 8),
            Attrs::new()
                .with("index", 1)
                .with("address", "127.0.0.1")
                .with("prefixlen", 8)
                .with("family", AF_INET)
                .with("scope", RT_SCOPE_HOST)
                .with("label", "lo"),
        );

        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(state),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Subscribe to every event applied from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Full current state as `New` events: links, then addresses, routes,
    /// and neighbours.
    pub fn snapshot(&self) -> Vec<Event> {
        let state = self.inner.state.lock();
        let links = state.links.values();
        let addresses = state.addresses.values();
        let routes = state.routes.values();
        let neighbours = state.neighbours.values();

        links
            .map(|a| Event::new(Kind::Interface, a.clone()))
            .chain(addresses.map(|a| Event::new(Kind::Address, a.clone())))
            .chain(routes.map(|a| Event::new(Kind::Route, a.clone())))
            .chain(neighbours.map(|a| Event::new(Kind::Neighbour, a.clone())))
            .collect()
    }

    /// Index of the interface called `ifname`, if any.
    pub fn link_index(&self, ifname: &str) -> Option<i64> {
        self.inner.state.lock().link_by_name(ifname)
    }

    /// Apply one request. On success the realized entity is returned and
    /// every resulting event has been broadcast; on failure nothing changed.
    pub fn execute(&self, request: &Request) -> Result<Attrs, Error> {
        let mut state = self.inner.state.lock();
        let mut out = Vec::new();

        let key = if request.key.is_empty() {
            &request.attrs
        } else {
            &request.key
        };

        let result = match (request.kind, request.action) {
            (Kind::Interface, RequestAction::Create) => state.link_create(&request.attrs, &mut out),
            (Kind::Interface, RequestAction::Set) => state.link_set(key, &request.attrs, &mut out),
            (Kind::Interface, RequestAction::Delete) => state.link_delete(key, &mut out),
            (Kind::Address, RequestAction::Create) => state.addr_create(&request.attrs, &mut out),
            (Kind::Address, RequestAction::Set) => state.addr_set(key, &request.attrs, &mut out),
            (Kind::Address, RequestAction::Delete) => state.addr_delete(key, &mut out),
            (Kind::Route, RequestAction::Create) => state.route_create(&request.attrs, &mut out),
            (Kind::Route, RequestAction::Set) => state.route_set(key, &request.attrs, &mut out),
            (Kind::Route, RequestAction::Delete) => state.route_delete(key, &mut out),
            (Kind::Neighbour, RequestAction::Create) => {
                state.neigh_create(&request.attrs, &mut out)
            }
            (Kind::Neighbour, RequestAction::Set) => {
                state.neigh_set(key, &request.attrs, &mut out)
            }
            (Kind::Neighbour, RequestAction::Delete) => state.neigh_delete(key, &mut out),
        };

        match &result {
            Ok(_) => debug!(
                namespace = %self.inner.name,
                kind = %request.kind,
                action = %request.action,
                events = out.len(),
                "request applied"
            ),
            Err(e) => debug!(
                namespace = %self.inner.name,
                kind = %request.kind,
                action = %request.action,
                error = %e,
                "request rejected"
            ),
        }

        for event in out {
            // No subscribers is fine.
            let _ = self.inner.events.send(event);
        }
        result
    }
}

// ── Validation helpers ──────────────────────────────────────────────

fn reject(code: i32) -> Error {
    Error::rejected(code)
}

fn parse_ip(value: Option<&Value>) -> Result<IpAddr, Error> {
    value
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| reject(EINVAL))
}

fn parse_net(ip: IpAddr, len: i64) -> Result<IpNet, Error> {
    let len = u8::try_from(len).map_err(|_| reject(EINVAL))?;
    IpNet::new(ip, len).map_err(|_| reject(EINVAL))
}

fn family_of(ip: IpAddr) -> i64 {
    if ip.is_ipv4() { AF_INET } else { AF_INET6 }
}

fn is_mac(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Locally administered MAC derived from the interface index.
fn mac_for(index: i64) -> String {
    let b = index.to_be_bytes();
    format!(
        "02:00:{:02x}:{:02x}:{:02x}:{:02x}",
        b[4], b[5], b[6], b[7]
    )
}

/// Reference value: `Null` and `0` both mean "none".
fn reference(value: &Value) -> Result<Option<i64>, Error> {
    match value {
        Value::Null | Value::Int(0) => Ok(None),
        Value::Int(i) => Ok(Some(*i)),
        _ => Err(reject(EINVAL)),
    }
}

fn int_value(value: &Value) -> Result<i64, Error> {
    value.as_int().ok_or_else(|| reject(EINVAL))
}

// ── Links ───────────────────────────────────────────────────────────

impl State {
    fn link_by_name(&self, ifname: &str) -> Option<i64> {
        self.links
            .iter()
            .find(|(_, row)| row.get_str("ifname") == Some(ifname))
            .map(|(index, _)| *index)
    }

    fn link_key(&self, key: &Attrs) -> Result<i64, Error> {
        let index = match key.get_int("index") {
            Some(i) => Some(i),
            None => key.get_str("ifname").and_then(|n| self.link_by_name(n)),
        };
        index
            .filter(|i| self.links.contains_key(i))
            .ok_or_else(|| reject(ENODEV))
    }

    /// Validate `changes` against `row` and write them into it.
    fn update_link(&self, row: &mut Attrs, changes: &Attrs, creating: bool) -> Result<(), Error> {
        let index = row.get_int("index").unwrap_or_default();
        let kind = row.get_str("kind").unwrap_or_default().to_owned();

        for (name, value) in changes {
            match name.as_str() {
                "ifname" => {
                    let ifname = value.as_str().filter(|n| !n.is_empty()).ok_or_else(|| reject(EINVAL))?;
                    if self.link_by_name(ifname).is_some_and(|other| other != index) {
                        return Err(reject(EEXIST));
                    }
                    row.insert("ifname", ifname);
                }
                "kind" => {
                    if value.as_str() != Some(kind.as_str()) {
                        return Err(reject(EOPNOTSUPP));
                    }
                }
                "state" => match value.as_str() {
                    Some(s @ ("up" | "down")) => {
                        row.insert("state", s);
                    }
                    _ => return Err(reject(EINVAL)),
                },
                "address" => match value.as_str() {
                    Some(mac) if is_mac(mac) => {
                        row.insert("address", mac.to_ascii_lowercase());
                    }
                    _ => return Err(reject(EINVAL)),
                },
                "mtu" => {
                    let mtu = int_value(value)?;
                    if !(68..=65536).contains(&mtu) {
                        return Err(reject(EINVAL));
                    }
                    row.insert("mtu", mtu);
                }
                "master" => match reference(value)? {
                    None => {
                        row.insert("master", Value::Null);
                    }
                    Some(master) => {
                        let target = self.links.get(&master).ok_or_else(|| reject(ENODEV))?;
                        let capable = target
                            .get_str("kind")
                            .is_some_and(|k| MASTER_KINDS.contains(&k));
                        if master == index || !capable {
                            return Err(reject(EINVAL));
                        }
                        row.insert("master", master);
                    }
                },
                "link" => {
                    let link = reference(value)?;
                    if creating {
                        if kind != "vlan" && link.is_some() {
                            return Err(reject(EOPNOTSUPP));
                        }
                        if let Some(parent) = link {
                            if !self.links.contains_key(&parent) {
                                return Err(reject(ENODEV));
                            }
                        }
                        row.insert("link", Value::from(link));
                    } else if link != row.get_int("link") {
                        return Err(reject(EOPNOTSUPP));
                    }
                }
                "vlan_id" => {
                    if kind != "vlan" {
                        return Err(reject(EOPNOTSUPP));
                    }
                    let id = int_value(value)?;
                    if !(1..=4094).contains(&id) {
                        return Err(reject(EINVAL));
                    }
                    if !creating && row.get_int("vlan_id") != Some(id) {
                        return Err(reject(EOPNOTSUPP));
                    }
                    row.insert("vlan_id", id);
                }
                "vlan_protocol" => {
                    if kind != "vlan" {
                        return Err(reject(EOPNOTSUPP));
                    }
                    let proto = int_value(value)?;
                    if proto != ETH_P_8021Q && proto != ETH_P_8021AD {
                        return Err(reject(EINVAL));
                    }
                    row.insert("vlan_protocol", proto);
                }
                "stp_state" => {
                    if kind != "bridge" {
                        return Err(reject(EOPNOTSUPP));
                    }
                    let stp = int_value(value)?;
                    if !(0..=1).contains(&stp) {
                        return Err(reject(EINVAL));
                    }
                    row.insert("stp_state", stp);
                }
                "forward_delay" => {
                    if kind != "bridge" {
                        return Err(reject(EOPNOTSUPP));
                    }
                    let delay = int_value(value)?;
                    if delay < 0 {
                        return Err(reject(EINVAL));
                    }
                    row.insert("forward_delay", delay);
                }
                "vlan_filtering" => {
                    if kind != "bridge" {
                        return Err(reject(EOPNOTSUPP));
                    }
                    let Value::Bool(on) = value else {
                        return Err(reject(EINVAL));
                    };
                    row.insert("vlan_filtering", *on);
                }
                // index is assigned, everything else is not ours
                _ => {}
            }
        }
        Ok(())
    }

    fn link_create(&mut self, attrs: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let ifname = attrs
            .get_str("ifname")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| reject(EINVAL))?;
        if self.link_by_name(ifname).is_some() {
            return Err(reject(EEXIST));
        }
        let kind = attrs
            .get_str("kind")
            .filter(|k| LINK_KINDS.contains(k))
            .ok_or_else(|| reject(EOPNOTSUPP))?;

        let index = self.next_index;
        let mut row = Attrs::new()
            .with("index", index)
            .with("ifname", ifname)
            .with("kind", kind)
            .with("state", "down")
            .with("address", mac_for(index))
            .with("mtu", 1500)
            .with("master", Value::Null)
            .with("link", Value::Null);
        match kind {
            "vlan" => {
                row.insert("vlan_id", Value::Null);
                row.insert("vlan_protocol", ETH_P_8021Q);
            }
            "bridge" => {
                row.insert("stp_state", 0);
                row.insert("forward_delay", 1500);
                row.insert("vlan_filtering", false);
            }
            _ => {}
        }

        self.update_link(&mut row, attrs, true)?;

        if kind == "vlan" {
            if row.get_int("link").is_none() {
                return Err(reject(ENODEV));
            }
            if row.get_int("vlan_id").is_none() {
                return Err(reject(EINVAL));
            }
        }

        self.next_index += 1;
        self.links.insert(index, row.clone());
        out.push(Event::new(Kind::Interface, row.clone()));
        Ok(row)
    }

    fn link_set(&mut self, key: &Attrs, attrs: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let index = self.link_key(key)?;
        let mut row = self.links.get(&index).cloned().ok_or_else(|| reject(ENODEV))?;
        self.update_link(&mut row, attrs, false)?;

        if self.links.get(&index) != Some(&row) {
            self.links.insert(index, row.clone());
            out.push(Event::new(Kind::Interface, row.clone()));
        }
        Ok(row)
    }

    fn link_delete(&mut self, key: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let index = self.link_key(key)?;
        let row = self.links.get(&index).cloned().ok_or_else(|| reject(ENODEV))?;
        self.remove_link(index, out);
        Ok(row)
    }

    /// Remove a link and everything that cannot outlive it.
    fn remove_link(&mut self, index: i64, out: &mut Vec<Event>) {
        let vlans: Vec<i64> = self
            .links
            .iter()
            .filter(|(_, r)| r.get_int("link") == Some(index) && r.get_str("kind") == Some("vlan"))
            .map(|(i, _)| *i)
            .collect();
        for vlan in vlans {
            self.remove_link(vlan, out);
        }

        let ports: Vec<i64> = self
            .links
            .iter()
            .filter(|(_, r)| r.get_int("master") == Some(index))
            .map(|(i, _)| *i)
            .collect();
        for port in ports {
            if let Some(row) = self.links.get_mut(&port) {
                row.insert("master", Value::Null);
                out.push(Event::new(Kind::Interface, row.clone()));
            }
        }

        let neighbours: Vec<NeighKey> = self
            .neighbours
            .keys()
            .filter(|k| k.0 == index)
            .cloned()
            .collect();
        for key in neighbours {
            if let Some(row) = self.neighbours.remove(&key) {
                out.push(Event::del(Kind::Neighbour, row));
            }
        }

        let routes: Vec<RouteKey> = self
            .routes
            .iter()
            .filter(|(_, r)| r.get_int("oif") == Some(index))
            .map(|(k, _)| k.clone())
            .collect();
        for key in routes {
            if let Some(row) = self.routes.remove(&key) {
                out.push(Event::del(Kind::Route, row));
            }
        }

        let addresses: Vec<AddrKey> = self
            .addresses
            .keys()
            .filter(|k| k.0 == index)
            .cloned()
            .collect();
        for key in addresses {
            if let Some(row) = self.addresses.remove(&key) {
                out.push(Event::del(Kind::Address, row));
            }
        }

        if let Some(row) = self.links.remove(&index) {
            out.push(Event::del(Kind::Interface, row));
        }
    }
}

// ── Addresses ───────────────────────────────────────────────────────

impl State {
    fn addr_key(key: &Attrs) -> Result<AddrKey, Error> {
        let index = key.get_int("index").ok_or_else(|| reject(EINVAL))?;
        let ip = parse_ip(key.get("address"))?;
        let prefixlen = key.get_int("prefixlen").ok_or_else(|| reject(EINVAL))?;
        parse_net(ip, prefixlen)?;
        Ok((index, ip.to_string(), prefixlen))
    }

    /// True when `gateway` lies inside an address subnet on `oif`.
    fn reachable(&self, oif: i64, gateway: IpAddr) -> bool {
        self.addresses
            .iter()
            .filter(|(k, _)| k.0 == oif)
            .filter_map(|(k, _)| {
                let ip: IpAddr = k.1.parse().ok()?;
                parse_net(ip, k.2).ok()
            })
            .any(|net| net.contains(&gateway))
    }

    fn addr_create(&mut self, attrs: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let index = attrs.get_int("index").ok_or_else(|| reject(ENODEV))?;
        let link = self.links.get(&index).ok_or_else(|| reject(ENODEV))?;
        let key = Self::addr_key(attrs)?;
        if self.addresses.contains_key(&key) {
            return Err(reject(EEXIST));
        }

        let ip: IpAddr = key.1.parse().map_err(|_| reject(EINVAL))?;
        let label = attrs
            .get_str("label")
            .or_else(|| link.get_str("ifname"))
            .unwrap_or_default()
            .to_owned();
        let scope = attrs.get_int("scope").unwrap_or(if ip.is_loopback() {
            RT_SCOPE_HOST
        } else {
            RT_SCOPE_UNIVERSE
        });

        let row = Attrs::new()
            .with("index", index)
            .with("address", key.1.clone())
            .with("prefixlen", key.2)
            .with("family", family_of(ip))
            .with("scope", scope)
            .with("label", label);
        self.addresses.insert(key, row.clone());
        out.push(Event::new(Kind::Address, row.clone()));
        Ok(row)
    }

    fn addr_set(&mut self, key: &Attrs, attrs: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let key = Self::addr_key(key)?;
        let row = self.addresses.get_mut(&key).ok_or_else(|| reject(EADDRNOTAVAIL))?;
        let before = row.clone();

        if let Some(label) = attrs.get("label") {
            row.insert("label", label.as_str().ok_or_else(|| reject(EINVAL))?);
        }
        if let Some(scope) = attrs.get("scope") {
            row.insert("scope", int_value(scope)?);
        }

        let row = row.clone();
        if row != before {
            out.push(Event::new(Kind::Address, row.clone()));
        }
        Ok(row)
    }

    fn addr_delete(&mut self, key: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let key = Self::addr_key(key)?;
        let row = self.addresses.remove(&key).ok_or_else(|| reject(EADDRNOTAVAIL))?;
        out.push(Event::del(Kind::Address, row.clone()));

        let oif = key.0;
        let stranded: Vec<RouteKey> = self
            .routes
            .iter()
            .filter(|(_, r)| r.get_int("oif") == Some(oif))
            .filter_map(|(k, r)| {
                let gateway: IpAddr = r.get_str("gateway")?.parse().ok()?;
                (!self.reachable(oif, gateway)).then(|| k.clone())
            })
            .collect();
        for key in stranded {
            if let Some(route) = self.routes.remove(&key) {
                out.push(Event::del(Kind::Route, route));
            }
        }
        Ok(row)
    }
}

// ── Routes ──────────────────────────────────────────────────────────

impl State {
    fn route_key(key: &Attrs) -> Result<RouteKey, Error> {
        let table = key.get_int("table").unwrap_or(RT_TABLE_MAIN);
        let dst_len = key.get_int("dst_len").unwrap_or(0);
        let dst = match key.get("dst").filter(|v| !v.is_null()) {
            Some(v) => parse_ip(Some(v))?,
            None => {
                let v6 = key
                    .get_str("gateway")
                    .and_then(|g| g.parse::<IpAddr>().ok())
                    .is_some_and(|g| g.is_ipv6());
                if v6 {
                    IpAddr::from([0u16; 8])
                } else {
                    IpAddr::from([0u8; 4])
                }
            }
        };
        let net = parse_net(dst, dst_len)?;
        if net.network() != dst {
            return Err(reject(EINVAL));
        }
        Ok((table, dst.to_string(), dst_len))
    }

    /// Resolve the output interface for a route from its `oif` and
    /// `gateway` attributes.
    fn route_path(&self, oif: Option<i64>, gateway: Option<IpAddr>) -> Result<i64, Error> {
        if let Some(oif) = oif {
            if !self.links.contains_key(&oif) {
                return Err(reject(ENODEV));
            }
        }
        match (oif, gateway) {
            (Some(oif), Some(gw)) => {
                if self.reachable(oif, gw) {
                    Ok(oif)
                } else {
                    Err(reject(ENETUNREACH))
                }
            }
            (Some(oif), None) => Ok(oif),
            (None, Some(gw)) => self
                .links
                .keys()
                .copied()
                .find(|i| self.reachable(*i, gw))
                .ok_or_else(|| reject(ENETUNREACH)),
            (None, None) => Err(reject(EINVAL)),
        }
    }

    fn route_create(&mut self, attrs: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let key = Self::route_key(attrs)?;
        let dst: IpAddr = key.1.parse().map_err(|_| reject(EINVAL))?;

        let gateway = match attrs.get("gateway").filter(|v| !v.is_null()) {
            Some(v) => Some(parse_ip(Some(v))?),
            None => None,
        };
        if gateway.is_some_and(|g| g.is_ipv4() != dst.is_ipv4()) {
            return Err(reject(EINVAL));
        }
        let oif = match attrs.get("oif") {
            Some(v) => reference(v)?,
            None => None,
        };
        let oif = self.route_path(oif, gateway)?;

        if self.routes.contains_key(&key) {
            return Err(reject(EEXIST));
        }

        let default_scope = if gateway.is_some() {
            RT_SCOPE_UNIVERSE
        } else {
            RT_SCOPE_LINK
        };
        let row = Attrs::new()
            .with("table", key.0)
            .with("dst", key.1.clone())
            .with("dst_len", key.2)
            .with("gateway", gateway.map(|g| g.to_string()))
            .with("oif", oif)
            .with("priority", attrs.get_int("priority").unwrap_or(0))
            .with("proto", attrs.get_int("proto").unwrap_or(RTPROT_BOOT))
            .with("scope", attrs.get_int("scope").unwrap_or(default_scope))
            .with("family", family_of(dst));
        self.routes.insert(key, row.clone());
        out.push(Event::new(Kind::Route, row.clone()));
        Ok(row)
    }

    fn route_set(&mut self, key: &Attrs, attrs: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let key = Self::route_key(key)?;
        let mut row = self.routes.get(&key).cloned().ok_or_else(|| reject(ESRCH))?;

        let gateway = match attrs.get("gateway").or_else(|| row.get("gateway")) {
            Some(Value::Null) | None => None,
            Some(v) => Some(parse_ip(Some(v))?),
        };
        let oif = match attrs.get("oif") {
            Some(v) => reference(v)?,
            None => row.get_int("oif"),
        };
        let oif = self.route_path(oif, gateway)?;

        row.insert("gateway", gateway.map(|g| g.to_string()));
        row.insert("oif", oif);
        for name in ["priority", "proto", "scope"] {
            if let Some(v) = attrs.get(name) {
                row.insert(name, int_value(v)?);
            }
        }

        if self.routes.get(&key) != Some(&row) {
            self.routes.insert(key, row.clone());
            out.push(Event::new(Kind::Route, row.clone()));
        }
        Ok(row)
    }

    fn route_delete(&mut self, key: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let key = Self::route_key(key)?;
        let row = self.routes.remove(&key).ok_or_else(|| reject(ESRCH))?;
        out.push(Event::del(Kind::Route, row.clone()));
        Ok(row)
    }
}

// ── Neighbours ──────────────────────────────────────────────────────

impl State {
    fn neigh_key(key: &Attrs) -> Result<NeighKey, Error> {
        let ifindex = key.get_int("ifindex").ok_or_else(|| reject(EINVAL))?;
        let dst = parse_ip(key.get("dst"))?;
        Ok((ifindex, dst.to_string()))
    }

    fn neigh_create(&mut self, attrs: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let ifindex = attrs.get_int("ifindex").ok_or_else(|| reject(ENODEV))?;
        if !self.links.contains_key(&ifindex) {
            return Err(reject(ENODEV));
        }
        let key = Self::neigh_key(attrs)?;
        let lladdr = attrs
            .get_str("lladdr")
            .filter(|m| is_mac(m))
            .ok_or_else(|| reject(EINVAL))?;
        if self.neighbours.contains_key(&key) {
            return Err(reject(EEXIST));
        }

        let dst: IpAddr = key.1.parse().map_err(|_| reject(EINVAL))?;
        let row = Attrs::new()
            .with("ifindex", ifindex)
            .with("dst", key.1.clone())
            .with("lladdr", lladdr.to_ascii_lowercase())
            .with("state", attrs.get_str("state").unwrap_or("permanent"))
            .with("family", family_of(dst));
        self.neighbours.insert(key, row.clone());
        out.push(Event::new(Kind::Neighbour, row.clone()));
        Ok(row)
    }

    fn neigh_set(&mut self, key: &Attrs, attrs: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let key = Self::neigh_key(key)?;
        let row = self.neighbours.get_mut(&key).ok_or_else(|| reject(ENOENT))?;
        let before = row.clone();

        if let Some(lladdr) = attrs.get("lladdr") {
            let mac = lladdr.as_str().filter(|m| is_mac(m)).ok_or_else(|| reject(EINVAL))?;
            row.insert("lladdr", mac.to_ascii_lowercase());
        }
        if let Some(state) = attrs.get("state") {
            row.insert("state", state.as_str().ok_or_else(|| reject(EINVAL))?);
        }

        let row = row.clone();
        if row != before {
            out.push(Event::new(Kind::Neighbour, row.clone()));
        }
        Ok(row)
    }

    fn neigh_delete(&mut self, key: &Attrs, out: &mut Vec<Event>) -> Result<Attrs, Error> {
        let key = Self::neigh_key(key)?;
        let row = self.neighbours.remove(&key).ok_or_else(|| reject(ENOENT))?;
        out.push(Event::del(Kind::Neighbour, row.clone()));
        Ok(row)
    }
}
