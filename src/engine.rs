//! Protocol engine: request decoding, dispatch, and reply construction.
//!
//! [`Engine::handle_packet`] processes exactly one datagram: sweep expired
//! state, decode, apply the per-message-type policy, mutate the lease
//! store, and build the reply. It returns the encoded reply with its
//! destination, or `None` when policy says to stay silent (malformed
//! input, foreign server id, unknown message type, or an encode failure).
//!
//! The engine owns the lease store and is purely synchronous; the event
//! loop in [`crate::server`] feeds it one packet at a time.

use std::net::{Ipv6Addr, SocketAddrV6};

use tracing::{debug, warn};

use crate::alloc::{allocate_addr, allocate_prefix};
use crate::config::Config;
use crate::duid::{Duid, IaKind, LeaseKey};
use crate::error::{Error, Result};
use crate::lease::{LeaseState, LeaseStore, NaLease, PdLease, StoreStats};
use crate::options::{MessageType, OptionCode, StatusCode};
use crate::packet::{Header, OptionView, REPLY_BUF_LEN, Writer};
use crate::pool::{AddressPool, PrefixPool};

/// All DHCP Relay Agents and Servers multicast group (RFC 8415 §7.1).
pub const ALL_DHCP_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

/// Port clients listen on.
pub const CLIENT_PORT: u16 = 546;

/// ORO codes retained per request; the rest of an oversized list is
/// ignored.
const MAX_ORO_CODES: usize = 32;

/// An encoded reply and where to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub payload: Vec<u8>,
    pub destination: SocketAddrV6,
}

/// Address-association request (IA_NA) as decoded from the wire.
#[derive(Debug, Clone, Copy)]
struct IaNaRequest {
    iaid: u32,
    addr_hint: Option<Ipv6Addr>,
}

/// Prefix-association request (IA_PD) as decoded from the wire.
#[derive(Debug, Clone, Copy)]
struct IaPdRequest {
    iaid: u32,
    hint_len: Option<u8>,
    hint_prefix: Option<Ipv6Addr>,
}

/// A fully decoded request. Parsing rejects anything the engine would
/// have to guess about; rejection means the packet is dropped silently.
#[derive(Debug)]
struct Request {
    msg_type: MessageType,
    txid: [u8; 3],
    client_id: Duid,
    server_id: Option<Duid>,
    oro: Vec<u16>,
    rapid_commit: bool,
    ia_na: Option<IaNaRequest>,
    ia_pd: Option<IaPdRequest>,
}

impl Request {
    fn parse(data: &[u8], duid_seed: u64) -> Result<Self> {
        let (header, mut options) = Header::parse(data)?;
        let msg_type = MessageType::try_from(header.msg_type)
            .map_err(|t| Error::InvalidPacket(format!("unhandled message type {}", t)))?;

        let mut client_id = None;
        let mut server_id = None;
        let mut oro = Vec::new();
        let mut rapid_commit = false;
        let mut ia_na = None;
        let mut ia_pd = None;

        while let Some(view) = options.next_option()? {
            match OptionCode::try_from(view.code) {
                Ok(OptionCode::ClientId) => {
                    client_id = Some(Duid::from_bytes(view.value, duid_seed)?);
                }
                Ok(OptionCode::ServerId) => {
                    server_id = Some(Duid::from_bytes(view.value, duid_seed)?);
                }
                Ok(OptionCode::Oro) => {
                    if !view.value.len().is_multiple_of(2) {
                        return Err(Error::InvalidPacket(
                            "odd-length option request".to_string(),
                        ));
                    }
                    oro = view
                        .value
                        .chunks_exact(2)
                        .take(MAX_ORO_CODES)
                        .map(|c| u16::from_be_bytes([c[0], c[1]]))
                        .collect();
                }
                Ok(OptionCode::RapidCommit) => rapid_commit = true,
                Ok(OptionCode::IaNa) => ia_na = Some(Self::parse_ia_na(&view)?),
                Ok(OptionCode::IaPd) => ia_pd = Some(Self::parse_ia_pd(&view)?),
                // Status, IaAddr, IaPrefix at top level, DNS, and anything
                // unrecognized: skipped.
                _ => {}
            }
        }

        let client_id = client_id
            .ok_or_else(|| Error::InvalidPacket("missing client identifier".to_string()))?;

        Ok(Self {
            msg_type,
            txid: header.txid,
            client_id,
            server_id,
            oro,
            rapid_commit,
            ia_na,
            ia_pd,
        })
    }

    /// IA_NA body: iaid, t1, t2 (client timers ignored), then nested
    /// options of which only IAADDR matters here.
    fn parse_ia_na(view: &OptionView<'_>) -> Result<IaNaRequest> {
        let mut body = view.reader();
        let iaid = body.read_u32()?;
        let _t1 = body.read_u32()?;
        let _t2 = body.read_u32()?;

        let mut addr_hint = None;
        while let Some(inner) = body.next_option()? {
            if inner.code == OptionCode::IaAddr as u16 && inner.value.len() >= 16 + 4 + 4 {
                let octets: [u8; 16] = inner.value[..16].try_into().unwrap_or([0; 16]);
                addr_hint = Some(Ipv6Addr::from(octets));
            }
        }
        Ok(IaNaRequest { iaid, addr_hint })
    }

    /// IA_PD body: iaid, t1, t2, then nested options of which only
    /// IAPREFIX (lifetimes, length byte, 16 prefix bytes) matters.
    fn parse_ia_pd(view: &OptionView<'_>) -> Result<IaPdRequest> {
        let mut body = view.reader();
        let iaid = body.read_u32()?;
        let _t1 = body.read_u32()?;
        let _t2 = body.read_u32()?;

        let mut hint_len = None;
        let mut hint_prefix = None;
        while let Some(inner) = body.next_option()? {
            if inner.code == OptionCode::IaPrefix as u16 && inner.value.len() >= 4 + 4 + 1 + 16 {
                hint_len = Some(inner.value[8]);
                let octets: [u8; 16] = inner.value[9..25].try_into().unwrap_or([0; 16]);
                hint_prefix = Some(Ipv6Addr::from(octets));
            }
        }
        Ok(IaPdRequest {
            iaid,
            hint_len,
            hint_prefix,
        })
    }

    fn wants(&self, code: OptionCode) -> bool {
        self.oro.contains(&(code as u16))
    }
}

/// Renew/rebind timers as fractions of the valid lifetime, with timer2
/// forced past timer1 so the client never skips straight to rebind.
fn timers(valid: u32) -> (u32, u32) {
    let t1 = valid / 2;
    let mut t2 = ((u64::from(valid) * 8) / 10) as u32;
    if t2 <= t1 {
        t2 = t1 + 1;
    }
    (t1, t2)
}

/// The protocol engine: server policy plus the lease store it guards.
pub struct Engine {
    server_duid: Duid,
    duid_seed: u64,
    address_pool: AddressPool,
    prefix_pool: PrefixPool,
    dns_servers: Vec<Ipv6Addr>,
    preferred_lft: u32,
    valid_lft: u32,
    offer_hold: u32,
    decline_quarantine: u32,
    store: Box<dyn LeaseStore>,
}

impl Engine {
    pub fn new(config: &Config, store: Box<dyn LeaseStore>) -> Result<Self> {
        let duid_bytes = config.server_duid_bytes()?;
        let server_duid = Duid::from_bytes(&duid_bytes, config.duid_seed)?;
        Ok(Self {
            server_duid,
            duid_seed: config.duid_seed,
            address_pool: config.address_pool.clone(),
            prefix_pool: config.prefix_pool.clone(),
            dns_servers: config.dns_servers.clone(),
            preferred_lft: config.preferred_lifetime_seconds,
            valid_lft: config.valid_lifetime_seconds,
            offer_hold: config.offer_hold_seconds,
            decline_quarantine: config.decline_quarantine_seconds,
            store,
        })
    }

    /// Store counters for the control socket.
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Processes one datagram against the wall clock.
    pub fn handle_packet(
        &mut self,
        data: &[u8],
        peer: SocketAddrV6,
        ifindex: u32,
    ) -> Option<Outbound> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.handle_packet_at(data, peer, ifindex, now)
    }

    /// Processes one datagram at an explicit epoch. Split out so tests
    /// drive the clock.
    pub fn handle_packet_at(
        &mut self,
        data: &[u8],
        peer: SocketAddrV6,
        ifindex: u32,
        now: u64,
    ) -> Option<Outbound> {
        let request = match Request::parse(data, self.duid_seed) {
            Ok(request) => request,
            Err(error) => {
                debug!("dropping packet from {}: {}", peer, error);
                return None;
            }
        };

        let evicted = self.store.gc(now);
        if evicted > 0 {
            debug!("gc evicted {} expired entries", evicted);
        }

        // REQUEST/RENEW/RELEASE are unicast toward a chosen server; a
        // foreign server id means the exchange is not ours. SOLICIT,
        // REBIND, CONFIRM, INFORMATION-REQUEST and DECLINE never carry a
        // binding server choice we would honor.
        if matches!(
            request.msg_type,
            MessageType::Request | MessageType::Renew | MessageType::Release
        ) && let Some(server_id) = &request.server_id
            && *server_id != self.server_duid
        {
            debug!(
                "dropping {} from {}: foreign server id",
                request.msg_type, peer
            );
            return None;
        }

        let reply_type = match request.msg_type {
            MessageType::Solicit if request.rapid_commit => MessageType::Reply,
            MessageType::Solicit => MessageType::Advertise,
            MessageType::Request
            | MessageType::Confirm
            | MessageType::Renew
            | MessageType::Rebind
            | MessageType::Release
            | MessageType::Decline
            | MessageType::InformationRequest => MessageType::Reply,
            MessageType::Advertise | MessageType::Reply | MessageType::Reconfigure => {
                debug!("ignoring {} from {}", request.msg_type, peer);
                return None;
            }
        };

        let na_result = self.process_ia_na(&request, now);
        let pd_result = self.process_ia_pd(&request, now);

        if request.msg_type == MessageType::Release {
            self.do_release(&request);
        }
        if request.msg_type == MessageType::Decline {
            self.do_decline(&request, now);
        }

        let payload = match self.build_reply(&request, reply_type, na_result, pd_result) {
            Ok(payload) => payload,
            Err(error) => {
                warn!("failed to encode {} reply: {}", reply_type, error);
                return None;
            }
        };

        // ADVERTISE and the reply committing a rapid-commit SOLICIT go to
        // the All-DHCP-Servers group on the inbound interface; everything
        // else unicasts back to the source at the client port.
        let destination = if reply_type == MessageType::Advertise
            || (request.msg_type == MessageType::Solicit && request.rapid_commit)
        {
            SocketAddrV6::new(ALL_DHCP_SERVERS, CLIENT_PORT, 0, ifindex)
        } else {
            SocketAddrV6::new(*peer.ip(), CLIENT_PORT, 0, peer.scope_id())
        };

        Some(Outbound {
            payload,
            destination,
        })
    }

    /// Whether this message type may create or extend bindings.
    fn allocates(msg_type: MessageType) -> bool {
        matches!(
            msg_type,
            MessageType::Solicit | MessageType::Request | MessageType::Renew | MessageType::Rebind
        )
    }

    /// Resolves the address association: existing lease, fresh
    /// allocation, or a failure to report per-IA.
    fn process_ia_na(&mut self, request: &Request, now: u64) -> Option<NaLease> {
        let ia = request.ia_na.as_ref()?;
        if request.msg_type == MessageType::Confirm
            || request.msg_type == MessageType::InformationRequest
        {
            return None;
        }

        let key = LeaseKey::new(&request.client_id, ia.iaid, IaKind::Na);

        // Unexpired lease for this key: reuse verbatim, no allocator call,
        // no store write. Retransmissions are idempotent through this.
        if let Some(existing) = self.store.get_na(&key)
            && existing.is_active(now)
        {
            return Some(existing);
        }

        if !Self::allocates(request.msg_type) {
            return None;
        }

        let addr = match allocate_addr(
            &self.address_pool,
            &request.client_id,
            ia.iaid,
            self.store.as_ref(),
            now,
        ) {
            Ok(addr) => addr,
            Err(error) => {
                debug!("no address for iaid {}: {}", ia.iaid, error);
                return None;
            }
        };

        let (state, hold_until) = self.new_lease_state(request, now);
        let lease = NaLease {
            key,
            addr,
            preferred_lft: self.preferred_lft,
            valid_lft: self.valid_lft,
            preferred_until: now + u64::from(self.preferred_lft),
            valid_until: now + u64::from(self.valid_lft),
            subnet_id: self.address_pool.subnet_id,
            pool_id: self.address_pool.pool_id,
            state,
            hold_until,
        };

        match self.store.put_na(lease.clone()) {
            Ok(()) => Some(lease),
            Err(error) => {
                warn!("cannot record address lease: {}", error);
                None
            }
        }
    }

    fn process_ia_pd(&mut self, request: &Request, now: u64) -> Option<PdLease> {
        let ia = request.ia_pd.as_ref()?;
        if request.msg_type == MessageType::Confirm
            || request.msg_type == MessageType::InformationRequest
        {
            return None;
        }

        let key = LeaseKey::new(&request.client_id, ia.iaid, IaKind::Pd);

        if let Some(existing) = self.store.get_pd(&key)
            && existing.is_active(now)
        {
            return Some(existing);
        }

        if !Self::allocates(request.msg_type) {
            return None;
        }

        let (prefix, prefix_len) = match allocate_prefix(
            &self.prefix_pool,
            &request.client_id,
            ia.iaid,
            ia.hint_len,
            self.store.as_ref(),
            now,
        ) {
            Ok(result) => result,
            Err(error) => {
                debug!("no prefix for iaid {}: {}", ia.iaid, error);
                return None;
            }
        };

        let (state, hold_until) = self.new_lease_state(request, now);
        let lease = PdLease {
            key,
            prefix,
            prefix_len,
            preferred_lft: self.preferred_lft,
            valid_lft: self.valid_lft,
            preferred_until: now + u64::from(self.preferred_lft),
            valid_until: now + u64::from(self.valid_lft),
            subnet_id: self.prefix_pool.subnet_id,
            pool_id: self.prefix_pool.pool_id,
            state,
            hold_until,
        };

        match self.store.put_pd(lease.clone()) {
            Ok(()) => Some(lease),
            Err(error) => {
                warn!("cannot record prefix lease: {}", error);
                None
            }
        }
    }

    /// A plain SOLICIT only reserves; everything else that allocates
    /// commits immediately.
    fn new_lease_state(&self, request: &Request, now: u64) -> (LeaseState, u64) {
        if request.msg_type == MessageType::Solicit && !request.rapid_commit {
            (LeaseState::Offered, now + u64::from(self.offer_hold))
        } else {
            (LeaseState::Allocated, 0)
        }
    }

    fn do_release(&mut self, request: &Request) {
        if let Some(ia) = &request.ia_na {
            let key = LeaseKey::new(&request.client_id, ia.iaid, IaKind::Na);
            self.store.delete_na(&key);
        }
        if let Some(ia) = &request.ia_pd {
            let key = LeaseKey::new(&request.client_id, ia.iaid, IaKind::Pd);
            self.store.delete_pd(&key);
        }
    }

    /// Quarantines the declined address/prefix and forgets the lease so
    /// the allocator stops proposing it until the quarantine lapses.
    fn do_decline(&mut self, request: &Request, now: u64) {
        let until = now + u64::from(self.decline_quarantine);
        if let Some(ia) = &request.ia_na
            && let Some(addr) = ia.addr_hint
        {
            if let Err(error) = self.store.decline_addr(addr, until) {
                warn!("cannot quarantine {}: {}", addr, error);
            }
            let key = LeaseKey::new(&request.client_id, ia.iaid, IaKind::Na);
            self.store.delete_na(&key);
        }
        if let Some(ia) = &request.ia_pd
            && let (Some(prefix), Some(len)) = (ia.hint_prefix, ia.hint_len)
        {
            if let Err(error) = self.store.decline_prefix(prefix, len, until) {
                warn!("cannot quarantine {}/{}: {}", prefix, len, error);
            }
            let key = LeaseKey::new(&request.client_id, ia.iaid, IaKind::Pd);
            self.store.delete_pd(&key);
        }
    }

    fn build_reply(
        &self,
        request: &Request,
        reply_type: MessageType,
        na: Option<NaLease>,
        pd: Option<PdLease>,
    ) -> Result<Vec<u8>> {
        let mut w = Writer::new(REPLY_BUF_LEN);
        w.write_header(reply_type as u8, request.txid)?;

        // Server id first, then the client's, in every reply.
        self.write_duid(&mut w, OptionCode::ServerId, &self.server_duid)?;
        self.write_duid(&mut w, OptionCode::ClientId, &request.client_id)?;

        match request.msg_type {
            MessageType::InformationRequest => {
                self.write_dns_if_requested(&mut w, request)?;
            }
            MessageType::Confirm => {
                self.write_dns_if_requested(&mut w, request)?;

                if let Some(ia) = &request.ia_na {
                    let on_link = ia
                        .addr_hint
                        .is_some_and(|addr| self.address_pool.is_on_link(&addr));
                    let status = if on_link { StatusCode::Success } else { StatusCode::NotOnLink };
                    self.write_ia_na(&mut w, ia.iaid, None, status)?;
                }
                if let Some(ia) = &request.ia_pd {
                    let on_link = ia
                        .hint_prefix
                        .is_some_and(|prefix| self.prefix_pool.is_on_link(&prefix));
                    let status = if on_link { StatusCode::Success } else { StatusCode::NotOnLink };
                    self.write_ia_pd(&mut w, ia.iaid, None, status)?;
                }
            }
            _ => {
                self.write_dns_if_requested(&mut w, request)?;

                if let Some(ia) = &request.ia_na {
                    self.write_ia_na(&mut w, ia.iaid, na.as_ref(), StatusCode::NoAddrsAvail)?;
                }
                if let Some(ia) = &request.ia_pd {
                    self.write_ia_pd(&mut w, ia.iaid, pd.as_ref(), StatusCode::NoAddrsAvail)?;
                }
            }
        }

        Ok(w.into_payload())
    }

    fn write_duid(&self, w: &mut Writer, code: OptionCode, duid: &Duid) -> Result<()> {
        let mark = w.begin_option(code as u16)?;
        w.write_bytes(duid.as_bytes())?;
        w.end_option(mark)
    }

    fn write_dns_if_requested(&self, w: &mut Writer, request: &Request) -> Result<()> {
        if self.dns_servers.is_empty() || !request.wants(OptionCode::DnsServers) {
            return Ok(());
        }
        let mark = w.begin_option(OptionCode::DnsServers as u16)?;
        for server in &self.dns_servers {
            w.write_bytes(&server.octets())?;
        }
        w.end_option(mark)
    }

    fn write_status(&self, w: &mut Writer, status: StatusCode) -> Result<()> {
        let mark = w.begin_option(OptionCode::Status as u16)?;
        w.write_u16(status as u16)?;
        // No message text; the code is the contract.
        w.end_option(mark)
    }

    /// IA_NA container: iaid, t1, t2, then either the bound address or a
    /// single status option — never both.
    fn write_ia_na(
        &self,
        w: &mut Writer,
        iaid: u32,
        lease: Option<&NaLease>,
        fail_status: StatusCode,
    ) -> Result<()> {
        let mark = w.begin_option(OptionCode::IaNa as u16)?;

        let (t1, t2) = lease.map_or((0, 0), |l| timers(l.valid_lft));
        w.write_u32(iaid)?;
        w.write_u32(t1)?;
        w.write_u32(t2)?;

        match lease {
            Some(lease) => {
                let inner = w.begin_option(OptionCode::IaAddr as u16)?;
                w.write_bytes(&lease.addr.octets())?;
                w.write_u32(lease.preferred_lft)?;
                w.write_u32(lease.valid_lft)?;
                w.end_option(inner)?;
            }
            None => self.write_status(w, fail_status)?,
        }

        w.end_option(mark)
    }

    /// IA_PD container: iaid, t1, t2, then IAPREFIX (lifetimes, length,
    /// prefix) or a single status option.
    fn write_ia_pd(
        &self,
        w: &mut Writer,
        iaid: u32,
        lease: Option<&PdLease>,
        fail_status: StatusCode,
    ) -> Result<()> {
        let mark = w.begin_option(OptionCode::IaPd as u16)?;

        let (t1, t2) = lease.map_or((0, 0), |l| timers(l.valid_lft));
        w.write_u32(iaid)?;
        w.write_u32(t1)?;
        w.write_u32(t2)?;

        match lease {
            Some(lease) => {
                let inner = w.begin_option(OptionCode::IaPrefix as u16)?;
                w.write_u32(lease.preferred_lft)?;
                w.write_u32(lease.valid_lft)?;
                w.write_u8(lease.prefix_len)?;
                w.write_bytes(&lease.prefix.octets())?;
                w.end_option(inner)?;
            }
            None => self.write_status(w, fail_status)?,
        }

        w.end_option(mark)
    }
}
