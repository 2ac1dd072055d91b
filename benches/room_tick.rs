//! Benchmark for one PLAYING tick.
//!
//! Four players, one NPC and a handful of projectiles in flight on a hazard map.
//!
//! Run with: cargo bench --bench room_tick

use std::sync::Arc;
use std::time::Duration;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tokio::time::Instant;

use arena_room::config::RoomConfig;
use arena_room::core::rng::DeterministicRng;
use arena_room::game::player::PlayerId;
use arena_room::network::protocol::ClientMessage;
use arena_room::room::messaging::MemorySink;
use arena_room::room::{Phase, RoomState};
use arena_room::services::InMemoryLedger;

const PLAYERS: [&str; 4] = ["alice", "bob", "carol", "dave"];

/// A hazard-map room that has just entered PLAYING, plus the match start time.
fn playing_room(map: &str) -> (RoomState, Instant) {
    let t0 = Instant::now();
    let mut state = RoomState::new(
        map,
        Arc::new(RoomConfig::default()),
        Arc::new(InMemoryLedger::new()),
        DeterministicRng::new(42),
    );

    let mut tickets = Vec::new();
    for name in PLAYERS {
        let player = PlayerId::new(name);
        if let Ok(ticket) = state.connect(&player, "player_0", MemorySink::new().boxed()) {
            tickets.push((player, ticket));
        }
    }
    for (player, ticket) in &tickets {
        state.handle_message(player, *ticket, ClientMessage::ReadyToggle, t0);
    }
    for s in 1..=5 {
        state.tick(t0 + Duration::from_secs(s));
    }
    assert_eq!(state.phase(), Phase::Playing);
    let started = t0 + Duration::from_secs(5);

    // Everyone fires in a different direction
    for (i, (player, ticket)) in tickets.iter().enumerate() {
        let angle = i as f32 * std::f32::consts::FRAC_PI_2;
        let attack = ClientMessage::Attack { direction_x: angle.cos(), direction_y: angle.sin() };
        state.handle_message(player, *ticket, attack, started);
    }
    (state, started)
}

fn benchmark_playing_tick(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let _guard = runtime.enter();

    let step = Duration::from_micros(16_667);

    c.bench_function("playing_tick_hazard_map", |b| {
        b.iter_batched(
            || playing_room("map3"),
            |(mut state, started)| black_box(state.tick(black_box(started + step))),
            BatchSize::SmallInput,
        )
    });

    c.bench_function("playing_tick_plain_map", |b| {
        b.iter_batched(
            || playing_room("map1"),
            |(mut state, started)| black_box(state.tick(black_box(started + step))),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, benchmark_playing_tick);
criterion_main!(benches);
