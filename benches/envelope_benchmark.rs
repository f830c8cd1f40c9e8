use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;
use tablenet::{
    networking::message::Message,
    networking::message_envelope::{MessageEnvelope, NULL_CORRELATION_ID},
    player::{Player, PlayerRole},
    table::{TableIncrement, TableMemento},
};

fn create_memento(components: usize) -> TableMemento {
    let mut state = BTreeMap::new();
    for i in 0..components {
        state.insert(format!("component-{}", i), vec![i as u8; 64]);
    }
    TableMemento::new(state)
}

fn create_players() -> Vec<Player> {
    let mut players = vec![Player::with_roles(
        "host",
        &[PlayerRole::Host, PlayerRole::Editor],
    )];
    for i in 0..8 {
        players.push(Player::new(&format!("player-{}", i)));
    }
    players
}

fn bench_encode_increment(c: &mut Criterion) {
    let message = Message::TableIncrement {
        increment: TableIncrement::set("die", vec![6]),
    };
    c.bench_function("encode table increment", |b| {
        b.iter(|| {
            MessageEnvelope::from_message(black_box(&message), 1, NULL_CORRELATION_ID)
                .unwrap()
                .to_byte_array()
        })
    });
}

fn bench_encode_memento(c: &mut Criterion) {
    let message = Message::SetTableMemento {
        memento: create_memento(256),
    };
    c.bench_function("encode table memento", |b| {
        b.iter(|| {
            MessageEnvelope::from_message(black_box(&message), 1, NULL_CORRELATION_ID)
                .unwrap()
                .to_byte_array()
        })
    });
}

fn bench_decode_players(c: &mut Criterion) {
    let message = Message::Players {
        players: create_players(),
    };
    let bytes = MessageEnvelope::from_message(&message, 1, NULL_CORRELATION_ID)
        .unwrap()
        .to_byte_array();
    c.bench_function("decode player list", |b| {
        b.iter(|| {
            MessageEnvelope::from_byte_array(black_box(&bytes))
                .unwrap()
                .decode_message()
                .unwrap()
        })
    });
}

fn bench_decode_memento(c: &mut Criterion) {
    let message = Message::SetTableMemento {
        memento: create_memento(256),
    };
    let bytes = MessageEnvelope::from_message(&message, 1, NULL_CORRELATION_ID)
        .unwrap()
        .to_byte_array();
    c.bench_function("decode table memento", |b| {
        b.iter(|| {
            MessageEnvelope::from_byte_array(black_box(&bytes))
                .unwrap()
                .decode_message()
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_increment,
    bench_encode_memento,
    bench_decode_players,
    bench_decode_memento
);
criterion_main!(benches);
