//! Emberfall Demo Server
//!
//! Runs an authoritative session and a predicted client over an in-memory
//! loopback link, then verifies that the deterministic core replays to a
//! bit-identical state digest.

use anyhow::{ensure, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use emberfall::core::fixed::to_float;
use emberfall::net::{loopback_pair, ClientSetup, ClientVars, ServerSetup, ServerVars};
use emberfall::sim::{
    Cosmos, CosmicEntropy, InputEvent, Intent, IntentKind, PlayerEntropy, SolveSettings, SpellCast,
    SpellKind, Transform,
};
use emberfall::{DEFAULT_TICK_RATE, VERSION};

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Emberfall Core v{}", VERSION);
    info!("Tick Rate: {} Hz", DEFAULT_TICK_RATE);

    demo_session()?;
    verify_determinism()?;
    Ok(())
}

/// Scripted client input for one demo tick.
fn scripted_input(tick: u32) -> Vec<InputEvent> {
    let mut events = Vec::new();

    // Strafe in 60-tick phases.
    match tick % 240 {
        0 => events.push(InputEvent::Intent(Intent {
            kind: IntentKind::MoveRight,
            pressed: true,
        })),
        60 => {
            events.push(InputEvent::Intent(Intent {
                kind: IntentKind::MoveRight,
                pressed: false,
            }));
            events.push(InputEvent::Intent(Intent {
                kind: IntentKind::MoveForward,
                pressed: true,
            }));
        }
        120 => {
            events.push(InputEvent::Intent(Intent {
                kind: IntentKind::MoveForward,
                pressed: false,
            }));
            events.push(InputEvent::Intent(Intent {
                kind: IntentKind::MoveLeft,
                pressed: true,
            }));
        }
        180 => events.push(InputEvent::Intent(Intent {
            kind: IntentKind::MoveLeft,
            pressed: false,
        })),
        _ => {}
    }

    if tick % 300 == 150 {
        events.push(InputEvent::Cast(SpellCast {
            spell: SpellKind::Haste,
        }));
    }

    events
}

/// Run a predicted client against the authoritative server over loopback
/// and check that every view of the world agrees once traffic settles.
fn demo_session() -> Result<()> {
    info!("=== Loopback Session ===");

    let vars = ServerVars {
        seed: 12345,
        ..Default::default()
    };
    let mut server = ServerSetup::new(vars);

    let (client_end, server_end) = loopback_pair();
    server.connect(server_end);
    let mut client = ClientSetup::new(ClientVars::default(), client_end);

    let delta_ms = server.cosmos().clock().delta_ms() as u64;
    let mut effects = 0usize;
    let mut repredictions = 0usize;

    // Ends just after a full strafe cycle so every key is released
    // before traffic settles.
    const SESSION_TICKS: u32 = 960;
    for tick in 0..SESSION_TICKS {
        for event in scripted_input(tick) {
            client.control(event);
        }

        let report = client.advance();
        effects += report.effects.len();
        repredictions += usize::from(report.repredicted);

        server.run((tick as u64 + 1) * delta_ms);
    }

    // Let in-flight traffic settle with no new input.
    for tick in SESSION_TICKS..SESSION_TICKS + 120 {
        client.advance();
        server.run((tick as u64 + 1) * delta_ms);
    }

    ensure!(client.session().is_in_game(), "client fell out of the session");
    ensure!(!client.session().resyncing(), "client ended the demo desynced");

    let guid = client.controlled().expect("client controls a character");
    let on_server = {
        let cosmos = server.cosmos();
        let id = cosmos.entity_by_guid(guid).expect("character is alive");
        cosmos.get_component::<Transform>(id).position
    };
    let predicted = {
        let cosmos = client.predicted().expect("client holds a world");
        let id = cosmos.entity_by_guid(guid).expect("character is alive");
        cosmos.get_component::<Transform>(id).position
    };

    info!(
        "Character at ({:.2}, {:.2}) on the server, ({:.2}, {:.2}) predicted",
        to_float(on_server.x),
        to_float(on_server.y),
        to_float(predicted.x),
        to_float(predicted.y),
    );
    info!(
        "Ticks: {}, effects presented: {}, repredictions: {}",
        server.cosmos().ticks_passed(),
        effects,
        repredictions
    );

    ensure!(
        on_server == predicted,
        "prediction failed to converge onto the authoritative state"
    );
    info!("CONVERGENCE VERIFIED: predicted == authoritative");
    Ok(())
}

/// Advance two identically seeded worlds through the same entropy and
/// compare their digests.
fn verify_determinism() -> Result<()> {
    info!("=== Verifying Determinism ===");

    let build = || {
        let mut cosmos = Cosmos::new(DEFAULT_TICK_RATE, 777);
        let player = cosmos.create_character(emberfall::FixedVec2::ZERO);
        let guid = cosmos.guid_of(player);
        (cosmos, guid)
    };
    let (mut a, guid) = build();
    let (mut b, _) = build();

    for tick in 0..1800u32 {
        let mut record = PlayerEntropy::default();
        for event in scripted_input(tick) {
            match event {
                InputEvent::Intent(i) => record.intents.push(i),
                InputEvent::Cast(c) => record.cast = Some(c),
                _ => {}
            }
        }
        let entropy = CosmicEntropy::of_player(guid, record);

        a.advance(&entropy, &SolveSettings::silent());
        b.advance(&entropy, &SolveSettings::silent());
    }

    let digest_a = a.state_digest();
    let digest_b = b.state_digest();
    info!("Run A digest: {}", hex::encode(digest_a));
    info!("Run B digest: {}", hex::encode(digest_b));

    ensure!(digest_a == digest_b, "replay diverged");
    info!("DETERMINISM VERIFIED: digests match");
    Ok(())
}
