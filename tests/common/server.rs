//! In-memory sync service.
//!
//! Implements both transport seams so a real `SyncClient` can run against
//! it. Server state is behind one mutex, which makes the compare-and-swap
//! on invitation status trivially serial.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kinsync::credentials::Credential;
use kinsync::model::{
    EmailAddress, Family, FamilyId, Invitation, InvitationStatus, InvitationToken, Member,
    MemberStatus, UserId,
};
use kinsync::permissions::Role;
use kinsync::sync::{RequestChannel, StreamConnector, StreamTransport};
use kinsync::TransportError;
use kinsync_proto::{
    codes, ApiError, ClientFrame, EntityKind, EntityUpdate, Operation, Request, Response,
    ServerFrame, StreamKey, UpdateBatch,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const INVITATION_TTL_HOURS: i64 = 168;

#[derive(Clone, Default)]
pub struct FakeServer {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<ServerState>,
    connections: Mutex<HashMap<u64, Connection>>,
    next_connection: AtomicU64,
    connects: AtomicU32,
    fail_connects: AtomicU32,
    stream_down: AtomicBool,
    handshake_silent: AtomicBool,
    requests_down: AtomicBool,
    valid_tokens: Mutex<HashSet<String>>,
    requests: Mutex<Vec<Request>>,
    canned_response: Mutex<Option<Response>>,
    frames: Mutex<Vec<(u64, ClientFrame)>>,
}

struct Connection {
    tx: mpsc::UnboundedSender<String>,
    subscriptions: HashSet<StreamKey>,
}

#[derive(Default)]
struct ServerState {
    clock: u64,
    families: HashMap<String, (Family, u64)>,
    members: HashMap<(String, String), (Member, u64)>,
    invitations: HashMap<String, (Invitation, u64, Option<Member>)>,
    presence: HashMap<(String, String), EntityUpdate>,
    orders: HashMap<String, EntityUpdate>,
    responses: HashMap<String, Response>,
}

impl ServerState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Knobs
    // ------------------------------------------------------------------

    pub fn accept_token(&self, token: &str) {
        self.inner.valid_tokens.lock().insert(token.to_string());
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Refuse every connection attempt while set.
    pub fn set_stream_down(&self, down: bool) {
        self.inner.stream_down.store(down, Ordering::SeqCst);
    }

    /// Accept connections but never answer `init` while set.
    pub fn set_handshake_silent(&self, silent: bool) {
        self.inner.handshake_silent.store(silent, Ordering::SeqCst);
    }

    /// Answer every request with `response` instead of handling it.
    pub fn respond_with(&self, response: Response) {
        *self.inner.canned_response.lock() = Some(response);
    }

    /// Fail every request while set.
    pub fn set_requests_down(&self, down: bool) {
        self.inner.requests_down.store(down, Ordering::SeqCst);
    }

    /// Close every open stream connection.
    pub fn drop_connections(&self) {
        self.inner.connections.lock().clear();
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn connect_count(&self) -> u32 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Operations received on the request channel, in arrival order,
    /// including attempts that failed in transit.
    pub fn operations(&self) -> Vec<Operation> {
        self.inner.requests.lock().iter().map(|r| r.operation).collect()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.inner.requests.lock().clone()
    }

    /// Streams subscribed on any currently open connection.
    pub fn subscribed(&self, stream: &StreamKey) -> bool {
        self.inner
            .connections
            .lock()
            .values()
            .any(|c| c.subscriptions.contains(stream))
    }

    pub fn subscribe_frames(&self) -> usize {
        self.inner
            .frames
            .lock()
            .iter()
            .filter(|(_, f)| matches!(f, ClientFrame::Subscribe { .. }))
            .count()
    }

    pub fn invitation(&self, token: &str) -> Option<Invitation> {
        self.inner
            .state
            .lock()
            .invitations
            .get(token)
            .map(|(inv, _, _)| inv.clone())
    }

    pub fn member_count(&self, family_id: &str, user_id: &str) -> usize {
        self.inner
            .state
            .lock()
            .members
            .keys()
            .filter(|(f, u)| f == family_id && u == user_id)
            .count()
    }

    // ------------------------------------------------------------------
    // Seeding and pushing
    // ------------------------------------------------------------------

    pub fn seed_family(&self, family_id: &str) {
        let mut state = self.inner.state.lock();
        let ts = state.tick();
        let family = Family {
            id: FamilyId::new(family_id),
            name: format!("Family {family_id}"),
            description: None,
            created_at: Utc::now(),
        };
        state.families.insert(family_id.to_string(), (family, ts));
    }

    pub fn seed_member(&self, family_id: &str, user_id: &str, email: &str, role: Role) {
        let mut state = self.inner.state.lock();
        let ts = state.tick();
        let member = member(family_id, user_id, email, role);
        state
            .members
            .insert((family_id.to_string(), user_id.to_string()), (member, ts));
    }

    pub fn seed_invitation(&self, token: &str, family_id: &str, email: &str, inviter_id: &str) {
        self.seed_invitation_at(token, family_id, email, inviter_id, Utc::now());
    }

    pub fn seed_invitation_at(
        &self,
        token: &str,
        family_id: &str,
        email: &str,
        inviter_id: &str,
        now: DateTime<Utc>,
    ) {
        let mut state = self.inner.state.lock();
        let ts = state.tick();
        let invitation = Invitation {
            token: InvitationToken::new(token),
            family_id: FamilyId::new(family_id),
            email: EmailAddress::parse(email).expect("valid email"),
            inviter_id: UserId::new(inviter_id),
            role: Role::ExtendedFamily,
            restrictions: None,
            status: InvitationStatus::Pending,
            created_at: now,
            last_notified_at: now,
            resolved_at: None,
            resolved_by: None,
            version: 1,
        };
        state
            .invitations
            .insert(token.to_string(), (invitation, ts, None));
    }

    /// Deliver an update to every connection subscribed to `stream`.
    pub fn push(&self, stream: StreamKey, update: EntityUpdate) {
        if update.kind == EntityKind::Order {
            self.inner
                .state
                .lock()
                .orders
                .insert(update.id.clone(), update.clone());
        }
        if update.kind == EntityKind::Presence {
            let key = (
                update.payload["family_id"].as_str().unwrap_or_default().to_string(),
                update.payload["user_id"].as_str().unwrap_or_default().to_string(),
            );
            self.inner.state.lock().presence.insert(key, update.clone());
        }
        self.inner.publish(&stream, update);
    }

    /// Send raw text to every open connection.
    pub fn push_raw(&self, text: &str) {
        for connection in self.inner.connections.lock().values() {
            let _ = connection.tx.send(text.to_string());
        }
    }
}

pub fn member(family_id: &str, user_id: &str, email: &str, role: Role) -> Member {
    Member {
        family_id: FamilyId::new(family_id),
        user_id: UserId::new(user_id),
        role,
        status: MemberStatus::Active,
        display_name: user_id.to_string(),
        email: EmailAddress::parse(email).expect("valid email"),
        restrictions: None,
        joined_at: Utc::now(),
    }
}

pub fn presence_update(family_id: &str, user_id: &str, status: &str, timestamp: u64) -> EntityUpdate {
    EntityUpdate::new(
        EntityKind::Presence,
        format!("{family_id}:{user_id}"),
        timestamp,
        json!({ "family_id": family_id, "user_id": user_id, "status": status }),
    )
}

fn invitation_update(invitation: &Invitation, timestamp: u64, member: Option<&Member>) -> EntityUpdate {
    let mut payload = serde_json::to_value(invitation).expect("invitation serializes");
    if let Some(member) = member {
        payload["member"] = serde_json::to_value(member).expect("member serializes");
    }
    EntityUpdate::new(
        EntityKind::Invitation,
        invitation.token.as_str(),
        timestamp,
        payload,
    )
}

fn member_update(member: &Member, timestamp: u64) -> EntityUpdate {
    EntityUpdate::new(
        EntityKind::Member,
        format!("{}:{}", member.family_id, member.user_id),
        timestamp,
        serde_json::to_value(member).expect("member serializes"),
    )
}

fn family_update(family: &Family, timestamp: u64) -> EntityUpdate {
    EntityUpdate::new(
        EntityKind::Family,
        family.id.as_str(),
        timestamp,
        serde_json::to_value(family).expect("family serializes"),
    )
}

fn batch(updates: Vec<EntityUpdate>) -> Response {
    Response::ok(serde_json::to_value(UpdateBatch { updates }).expect("batch serializes"))
}

fn reject(code: &str, message: &str) -> Response {
    Response::err(ApiError::new(code, message))
}

fn str_field<'a>(input: &'a Value, field: &str) -> &'a str {
    input[field].as_str().unwrap_or_default()
}

impl Inner {
    fn publish(&self, stream: &StreamKey, update: EntityUpdate) {
        let text = ServerFrame::Event {
            stream: stream.clone(),
            update,
        }
        .encode()
        .expect("event encodes");
        for connection in self.connections.lock().values() {
            if connection.subscriptions.contains(stream) {
                let _ = connection.tx.send(text.clone());
            }
        }
    }

    fn reply(&self, id: u64, frame: ServerFrame) -> bool {
        match self.connections.lock().get(&id) {
            Some(connection) => {
                let _ = connection.tx.send(frame.encode().expect("frame encodes"));
                true
            }
            None => false,
        }
    }

    /// Current state of a stream, as events.
    fn snapshot(&self, stream: &StreamKey) -> Vec<EntityUpdate> {
        let state = self.state.lock();
        match stream {
            StreamKey::Family(family_id) => {
                let mut updates = Vec::new();
                if let Some((family, ts)) = state.families.get(family_id) {
                    updates.push(family_update(family, *ts));
                }
                for ((f, _), (member, ts)) in &state.members {
                    if f == family_id {
                        updates.push(member_update(member, *ts));
                    }
                }
                for (invitation, ts, member) in state.invitations.values() {
                    if invitation.family_id.as_str() == family_id {
                        updates.push(invitation_update(invitation, *ts, member.as_ref()));
                    }
                }
                updates
            }
            StreamKey::Presence(family_id) => state
                .presence
                .iter()
                .filter(|((f, _), _)| f == family_id)
                .map(|(_, u)| u.clone())
                .collect(),
            StreamKey::Order(order_id) => state.orders.get(order_id).cloned().into_iter().collect(),
            StreamKey::Prediction(_) => Vec::new(),
        }
    }

    fn handle_frame(&self, id: u64, frame: ClientFrame) -> bool {
        self.frames.lock().push((id, frame.clone()));
        match frame {
            ClientFrame::Init { credential, .. } => {
                if self.handshake_silent.load(Ordering::SeqCst) {
                    return self.connections.lock().contains_key(&id);
                }
                let reply = if self.valid_tokens.lock().contains(&credential) {
                    ServerFrame::InitAck {
                        session_id: format!("s-{id}"),
                    }
                } else {
                    ServerFrame::error(codes::UNAUTHORIZED, "credential rejected")
                };
                self.reply(id, reply)
            }
            ClientFrame::Subscribe { stream, .. } => {
                let updates = self.snapshot(&stream);
                let mut connections = self.connections.lock();
                let Some(connection) = connections.get_mut(&id) else {
                    return false;
                };
                connection.subscriptions.insert(stream.clone());
                for update in updates {
                    let text = ServerFrame::Event {
                        stream: stream.clone(),
                        update,
                    }
                    .encode()
                    .expect("event encodes");
                    let _ = connection.tx.send(text);
                }
                true
            }
            ClientFrame::Unsubscribe { stream, .. } => {
                match self.connections.lock().get_mut(&id) {
                    Some(connection) => {
                        connection.subscriptions.remove(&stream);
                        true
                    }
                    None => false,
                }
            }
            ClientFrame::Error { .. } => self.connections.lock().contains_key(&id),
        }
    }

    fn handle_request(&self, request: &Request) -> Response {
        if let Some(response) = self.canned_response.lock().clone() {
            return response;
        }
        if let Some(key) = &request.idempotency_key {
            if let Some(previous) = self.state.lock().responses.get(key) {
                return previous.clone();
            }
        }

        let input = &request.input;
        let response = match request.operation {
            Operation::InviteMember => self.invite(input),
            Operation::AcceptInvitation => self.resolve(input, InvitationStatus::Accepted),
            Operation::DeclineInvitation => self.resolve(input, InvitationStatus::Declined),
            Operation::CancelInvitation => self.resolve(input, InvitationStatus::Canceled),
            Operation::ResendInvitation => self.resend(input),
            Operation::FetchFamily => {
                let state = self.state.lock();
                let updates = state
                    .families
                    .get(str_field(input, "family_id"))
                    .map(|(family, ts)| family_update(family, *ts))
                    .into_iter()
                    .collect();
                batch(updates)
            }
            Operation::FetchMembers => {
                let state = self.state.lock();
                let family_id = str_field(input, "family_id");
                let updates = state
                    .members
                    .iter()
                    .filter(|((f, _), _)| f == family_id)
                    .map(|(_, (member, ts))| member_update(member, *ts))
                    .collect();
                batch(updates)
            }
            Operation::FetchInvitations => {
                let state = self.state.lock();
                let family_id = str_field(input, "family_id");
                let updates = state
                    .invitations
                    .values()
                    .filter(|(inv, _, _)| inv.family_id.as_str() == family_id)
                    .map(|(inv, ts, member)| invitation_update(inv, *ts, member.as_ref()))
                    .collect();
                batch(updates)
            }
            Operation::FetchPresence => batch(
                self.snapshot(&StreamKey::Presence(str_field(input, "family_id").to_string())),
            ),
            Operation::FetchOrder => {
                batch(self.snapshot(&StreamKey::Order(str_field(input, "order_id").to_string())))
            }
            Operation::FetchPrediction => batch(Vec::new()),
        };

        if let Some(key) = &request.idempotency_key {
            self.state
                .lock()
                .responses
                .insert(key.clone(), response.clone());
        }
        response
    }

    fn invite(&self, input: &Value) -> Response {
        let Ok(email) = EmailAddress::parse(str_field(input, "email")) else {
            return reject(codes::INVALID_INPUT, "bad email");
        };
        let family_id = str_field(input, "family_id").to_string();
        let role: Role = serde_json::from_value(input["role"].clone()).unwrap_or(Role::ExtendedFamily);

        let (invitation, ts) = {
            let mut state = self.state.lock();
            let duplicate = state.invitations.values().any(|(inv, _, _)| {
                inv.family_id.as_str() == family_id
                    && inv.email == email
                    && inv.status == InvitationStatus::Pending
            });
            if duplicate {
                return reject(codes::DUPLICATE_PENDING, "already invited");
            }
            let ts = state.tick();
            let now = Utc::now();
            let invitation = Invitation {
                token: InvitationToken::new(str_field(input, "token")),
                family_id: FamilyId::new(family_id.as_str()),
                email,
                inviter_id: UserId::new(str_field(input, "inviter_id")),
                role,
                restrictions: serde_json::from_value(input["restrictions"].clone()).unwrap_or(None),
                status: InvitationStatus::Pending,
                created_at: now,
                last_notified_at: now,
                resolved_at: None,
                resolved_by: None,
                version: 1,
            };
            state.invitations.insert(
                invitation.token.as_str().to_string(),
                (invitation.clone(), ts, None),
            );
            (invitation, ts)
        };

        let update = invitation_update(&invitation, ts, None);
        self.publish(&StreamKey::Family(family_id), update.clone());
        batch(vec![update])
    }

    fn resolve(&self, input: &Value, status: InvitationStatus) -> Response {
        let token = str_field(input, "token");
        let user_id = str_field(input, "user_id");

        let (update, family_id) = {
            let mut state = self.state.lock();
            let ts = state.tick();
            let Some((invitation, stamp, slot)) = state.invitations.get_mut(token) else {
                return reject(codes::NOT_FOUND, "no such invitation");
            };
            if invitation.status != InvitationStatus::Pending {
                return reject(codes::CONFLICT, "invitation already resolved");
            }
            if invitation.created_at + chrono::Duration::hours(INVITATION_TTL_HOURS) < Utc::now() {
                return reject(codes::EXPIRED, "invitation expired");
            }
            if status != InvitationStatus::Canceled
                && invitation.email.as_str() != str_field(input, "email").to_lowercase()
            {
                return reject(codes::EMAIL_MISMATCH, "wrong invitee");
            }

            invitation.status = status;
            invitation.version += 1;
            invitation.resolved_at = Some(Utc::now());
            invitation.resolved_by = Some(UserId::new(user_id));
            *stamp = ts;
            let new_member = (status == InvitationStatus::Accepted).then(|| {
                let mut m = member(
                    invitation.family_id.as_str(),
                    user_id,
                    invitation.email.as_str(),
                    invitation.role,
                );
                m.restrictions = invitation.restrictions.clone();
                m
            });
            *slot = new_member.clone();
            let update = invitation_update(invitation, ts, new_member.as_ref());
            let family_id = invitation.family_id.to_string();
            if let Some(m) = new_member {
                state
                    .members
                    .insert((family_id.clone(), user_id.to_string()), (m, ts));
            }
            (update, family_id)
        };

        self.publish(&StreamKey::Family(family_id), update.clone());
        batch(vec![update])
    }

    fn resend(&self, input: &Value) -> Response {
        let token = str_field(input, "token");
        let mut state = self.state.lock();
        let ts = state.tick();
        let Some((invitation, stamp, _)) = state.invitations.get_mut(token) else {
            return reject(codes::NOT_FOUND, "no such invitation");
        };
        if invitation.status != InvitationStatus::Pending {
            return reject(codes::CONFLICT, "invitation already resolved");
        }
        invitation.last_notified_at = Utc::now();
        invitation.version += 1;
        *stamp = ts;
        batch(vec![invitation_update(invitation, ts, None)])
    }
}

// ============================================================================
// Transport seams
// ============================================================================

struct FakeTransport {
    id: u64,
    inner: Arc<Inner>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let frame = ClientFrame::decode(&text)?;
        if self.inner.handle_frame(self.id, frame) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.inner.connections.lock().remove(&self.id);
    }
}

#[async_trait]
impl StreamConnector for FakeServer {
    async fn connect(&self) -> Result<Box<dyn StreamTransport>, TransportError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.stream_down.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".into()));
        }
        let refused = self
            .inner
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let id = self.inner.next_connection.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.lock().insert(
            id,
            Connection {
                tx,
                subscriptions: HashSet::new(),
            },
        );
        Ok(Box::new(FakeTransport {
            id,
            inner: Arc::clone(&self.inner),
            rx,
        }))
    }
}

#[async_trait]
impl RequestChannel for FakeServer {
    async fn call(
        &self,
        request: &Request,
        credential: Option<&Credential>,
    ) -> Result<Response, TransportError> {
        self.inner.requests.lock().push(request.clone());
        if self.inner.requests_down.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("request channel unreachable".into()));
        }
        let authorized = credential
            .is_some_and(|c| self.inner.valid_tokens.lock().contains(c.expose()));
        if !authorized {
            return Ok(reject(codes::UNAUTHORIZED, "credential rejected"));
        }
        Ok(self.inner.handle_request(request))
    }
}
