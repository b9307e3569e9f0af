//! ALOHA network model
//!
//! Hosts send frames straight to a single server over a shared radio
//! channel. A frame that overlaps any other frame at the server is lost,
//! together with every frame it overlaps.
//!
//! Server signals:
//! - `receive`: 1 while a collision-free frame is being received, 0 otherwise;
//!   the 1 is emitted with the reception's start time once the reception
//!   ended cleanly
//! - `receiveBegin`: number of frames currently arriving
//! - `collision`: number of frames in a collision, stamped with its start
//! - `collisionLength`: duration of a collision
//! - `channelState`: 0 idle, 1 transmission, 2 collision

use sigsweep::{ComponentId, Model, RunError, SimContext, SimTime};

use super::config::{AlohaConfig, PROPAGATION_SPEED};

pub const CHANNEL_IDLE: i64 = 0;
pub const CHANNEL_TRANSMISSION: i64 = 1;
pub const CHANNEL_COLLISION: i64 = 2;

/// Event times are whole nanoseconds, so a frame end and the slot boundary
/// it falls on compare equal
pub const TIME_RESOLUTION: SimTime = 1e-9;

fn to_ticks(t: SimTime) -> i64 {
    (t / TIME_RESOLUTION).round() as i64
}

fn from_ticks(ticks: i64) -> SimTime {
    ticks as f64 * TIME_RESOLUTION
}

/// `now + delay` on the nanosecond grid
fn after(now: SimTime, delay: SimTime) -> SimTime {
    from_ticks(to_ticks(now) + to_ticks(delay))
}

pub const SERVER_SIGNALS: [&str; 5] = [
    "receive",
    "receiveBegin",
    "collision",
    "collisionLength",
    "channelState",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlohaEvent {
    /// Host timer: start the next frame, or end the current one
    HostTimer { host: usize },

    /// First bit of a frame reaches the server
    FrameArrival { duration: SimTime },

    /// Last bit of the current reception; stale if `generation` moved on
    ReceptionEnd { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostState {
    Idle,
    Transmitting,
}

struct Host {
    state: HostState,
    radio_delay: SimTime,
    frames_sent: u64,
}

#[derive(Default)]
struct Server {
    id: Option<ComponentId>,
    channel_busy: bool,
    reception_start: SimTime,
    reception_end: SimTime,
    generation: u64,
    /// 0 while the current reception is clean, otherwise frames involved
    collision_frames: i64,
    receive_counter: i64,
    frames_received: u64,
    collisions: u64,
}

/// Pure or slotted ALOHA network
pub struct AlohaModel {
    config: AlohaConfig,
    hosts: Vec<Host>,
    server: Server,
    server_position: (f64, f64),
}

impl AlohaModel {
    pub fn new(config: AlohaConfig) -> Self {
        Self {
            config,
            hosts: Vec::new(),
            server: Server::default(),
            server_position: (0.0, 0.0),
        }
    }

    pub fn config(&self) -> &AlohaConfig {
        &self.config
    }

    /// Frames that reached the server without overlapping another frame
    pub fn frames_received(&self) -> u64 {
        self.server.frames_received
    }

    /// Number of collisions (each may involve several frames)
    pub fn collisions(&self) -> u64 {
        self.server.collisions
    }

    pub fn frames_sent(&self) -> u64 {
        self.hosts.iter().map(|h| h.frames_sent).sum()
    }

    /// Server coordinates drawn when the network was built
    pub fn server_position(&self) -> (f64, f64) {
        self.server_position
    }

    fn server_id(&self) -> Result<ComponentId, RunError> {
        self.server
            .id
            .ok_or_else(|| RunError::RunFailure("network not built".to_string()))
    }

    /// Now plus one inter-arrival time, moved up to the next slot boundary
    /// when slotted
    fn next_transmission_time(
        &self,
        host: usize,
        ctx: &mut SimContext<AlohaEvent>,
    ) -> Result<SimTime, RunError> {
        let params = &self.config.hosts[host];
        let ia_time = params
            .ia_time
            .sample(&format!("{}.iaTime", params.path), ctx.rng())?;
        if ia_time < 0.0 {
            return Err(RunError::RunFailure(format!(
                "{}.iaTime drew negative value {}",
                params.path, ia_time
            )));
        }

        let t = to_ticks(ctx.now()) + to_ticks(ia_time);
        let slot = to_ticks(self.config.slot_time);
        Ok(from_ticks(if slot > 0 {
            (t + slot - 1) / slot * slot
        } else {
            t
        }))
    }

    fn handle_host_timer(
        &mut self,
        host: usize,
        ctx: &mut SimContext<AlohaEvent>,
    ) -> Result<(), RunError> {
        match self.hosts[host].state {
            HostState::Idle => {
                let duration = self.config.frame_duration(self.config.hosts[host].pk_len_bits);
                let delay = self.hosts[host].radio_delay;
                let now = ctx.now();
                ctx.schedule_at(after(now, delay), AlohaEvent::FrameArrival { duration })?;
                ctx.schedule_at(after(now, duration), AlohaEvent::HostTimer { host })?;

                let h = &mut self.hosts[host];
                h.state = HostState::Transmitting;
                h.frames_sent += 1;
            }
            HostState::Transmitting => {
                self.hosts[host].state = HostState::Idle;
                let next = self.next_transmission_time(host, ctx)?;
                ctx.schedule_at(next, AlohaEvent::HostTimer { host })?;
            }
        }
        Ok(())
    }

    fn handle_frame_arrival(
        &mut self,
        duration: SimTime,
        ctx: &mut SimContext<AlohaEvent>,
    ) -> Result<(), RunError> {
        let server_id = self.server_id()?;
        let now = ctx.now();
        let end = after(now, duration);
        let server = &mut self.server;

        server.receive_counter += 1;
        ctx.emit(server_id, "receiveBegin", server.receive_counter);

        if !server.channel_busy {
            server.channel_busy = true;
            server.reception_start = now;
            server.reception_end = end;
            server.generation += 1;
            ctx.schedule_at(end, AlohaEvent::ReceptionEnd { generation: server.generation })?;
            ctx.emit(server_id, "channelState", CHANNEL_TRANSMISSION);
        } else {
            server.collision_frames = if server.collision_frames == 0 {
                2
            } else {
                server.collision_frames + 1
            };
            if end > server.reception_end {
                server.reception_end = end;
                server.generation += 1;
                ctx.schedule_at(end, AlohaEvent::ReceptionEnd { generation: server.generation })?;
            }
            ctx.emit(server_id, "channelState", CHANNEL_COLLISION);
        }
        Ok(())
    }

    fn handle_reception_end(&mut self, ctx: &mut SimContext<AlohaEvent>) -> Result<(), RunError> {
        let server_id = self.server_id()?;
        let now = ctx.now();
        let server = &mut self.server;

        server.channel_busy = false;
        ctx.emit(server_id, "channelState", CHANNEL_IDLE);

        if server.collision_frames == 0 {
            server.frames_received += 1;
            ctx.emit_at(server_id, "receive", 1i64, server.reception_start);
            ctx.emit(server_id, "receive", 0i64);
        } else {
            server.collisions += 1;
            ctx.emit_at(server_id, "collision", server.collision_frames, server.reception_start);
            ctx.emit(server_id, "collisionLength", now - server.reception_start);
        }

        server.collision_frames = 0;
        server.receive_counter = 0;
        ctx.emit(server_id, "receiveBegin", server.receive_counter);
        Ok(())
    }
}

impl Model for AlohaModel {
    type Event = AlohaEvent;

    fn build(&mut self, ctx: &mut SimContext<AlohaEvent>) -> Result<(), RunError> {
        let server = ctx.add_component("server")?;
        for signal in SERVER_SIGNALS {
            ctx.declare_signal(server, signal);
        }
        self.server.id = Some(server);

        let path = &self.config.network;
        let server_x = self.config.server_x.sample(&format!("{}.server.x", path), ctx.rng())?;
        let server_y = self.config.server_y.sample(&format!("{}.server.y", path), ctx.rng())?;
        self.server_position = (server_x, server_y);

        self.hosts.clear();
        for (i, params) in self.config.hosts.iter().enumerate() {
            ctx.add_component(&format!("host[{}]", i))?;
            let x = params.x.sample(&format!("{}.x", params.path), ctx.rng())?;
            let y = params.y.sample(&format!("{}.y", params.path), ctx.rng())?;
            let distance = (x - server_x).hypot(y - server_y);

            self.hosts.push(Host {
                state: HostState::Idle,
                radio_delay: distance / PROPAGATION_SPEED,
                frames_sent: 0,
            });
        }
        Ok(())
    }

    fn initialize(&mut self, ctx: &mut SimContext<AlohaEvent>) -> Result<(), RunError> {
        let server_id = self.server_id()?;
        // open the utilization window at t=0
        ctx.emit(server_id, "receive", 0i64);
        ctx.emit(server_id, "channelState", CHANNEL_IDLE);

        for host in 0..self.hosts.len() {
            let first = self.next_transmission_time(host, ctx)?;
            ctx.schedule_at(first, AlohaEvent::HostTimer { host })?;
        }
        Ok(())
    }

    fn handle(
        &mut self,
        event: AlohaEvent,
        ctx: &mut SimContext<AlohaEvent>,
    ) -> Result<(), RunError> {
        match event {
            AlohaEvent::HostTimer { host } => self.handle_host_timer(host, ctx),
            AlohaEvent::FrameArrival { duration } => self.handle_frame_arrival(duration, ctx),
            AlohaEvent::ReceptionEnd { generation } => {
                if generation == self.server.generation && self.server.channel_busy {
                    self.handle_reception_end(ctx)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn finish(&mut self, _ctx: &mut SimContext<AlohaEvent>) {
        log::debug!(
            "aloha: {} frames sent by {} hosts, {} received, {} collisions",
            self.frames_sent(),
            self.hosts.len(),
            self.server.frames_received,
            self.server.collisions
        );
    }
}
