// ── Installation catalog ──
//
// Reads rooms, keys, air conditioners and scenarios over the binary
// parameter API and turns them into named device entries. Requests go
// out strictly one at a time; the controller answers parameter queries
// in order and gets confused by overlapping ones.

use std::collections::HashMap;
use std::future::Future;

use vitrea_api::{KeyType, ParameterReply, ParameterRequest, Response};

use crate::error::{CommandError, CoreError};
use crate::model::{DeviceId, DeviceKind};

/// A device as the installation describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: DeviceId,
    pub kind: DeviceKind,
    pub name: String,
    pub room: Option<String>,
}

/// Which device kind a configured key type is exposed as. `None` for
/// key types the bridge does not surface.
pub fn kind_for_key(key_type: KeyType) -> Option<DeviceKind> {
    match key_type {
        KeyType::Dimmer => Some(DeviceKind::Light),
        KeyType::BlindUp
        | KeyType::BlindDown
        | KeyType::BlindUpAndDown
        | KeyType::TiltUp
        | KeyType::TiltDown
        | KeyType::TiltUpAndDown
        | KeyType::BlindMw => Some(DeviceKind::Cover),
        KeyType::Toggle | KeyType::Boiler | KeyType::Heater | KeyType::ToggleMw => {
            Some(DeviceKind::Switch)
        }
        KeyType::PushButton => Some(DeviceKind::BinarySensor),
        KeyType::Satellite => Some(DeviceKind::Sensor),
        KeyType::Fan => Some(DeviceKind::Fan),
        _ => None,
    }
}

/// One parameter-API round trip.
pub(crate) trait ParameterExchange {
    fn query(
        &self,
        request: ParameterRequest,
    ) -> impl Future<Output = Result<ParameterReply, CommandError>> + Send;
}

/// Unwraps the parameter body of a correlated reply.
pub(crate) fn expect_parameter(response: Response) -> Result<ParameterReply, CommandError> {
    match response {
        Response::Parameter(reply) => Ok(reply),
        other => Err(CommandError::Invalid(format!(
            "expected a parameter reply, got {other:?}"
        ))),
    }
}

/// Reads the full catalog. Any failed or timed-out query aborts discovery.
pub(crate) async fn discover<E: ParameterExchange + Sync>(
    exchange: &E,
) -> Result<Vec<CatalogEntry>, CoreError> {
    let rooms = read_rooms(exchange).await?;
    let room_name = |id: u16| rooms.get(&id).cloned();
    let mut entries = Vec::new();

    let keypads = exchange
        .query(ParameterRequest::keypad_numbers())
        .await?
        .parse_keypad_numbers()?;
    for keypad in keypads {
        for key in 1..=keypad.keys {
            let info = exchange
                .query(ParameterRequest::key_params(keypad.id, key))
                .await?
                .parse_key_params()?;
            let Some(kind) = info.key_type.and_then(kind_for_key) else {
                tracing::trace!(keypad = keypad.id, key, key_type = ?info.key_type, "Key not exposed");
                continue;
            };
            entries.push(CatalogEntry {
                id: DeviceId::Key {
                    node: info.keypad,
                    key: info.key,
                },
                kind,
                name: info.name,
                room: room_name(info.room),
            });
        }
    }

    let acs = exchange
        .query(ParameterRequest::ac_numbers())
        .await?
        .parse_ac_numbers()?;
    for ac in acs {
        let info = exchange
            .query(ParameterRequest::ac_params(ac))
            .await?
            .parse_ac_params()?;
        entries.push(CatalogEntry {
            id: DeviceId::Ac(info.id),
            kind: DeviceKind::Thermostat,
            name: info.name,
            room: room_name(info.room),
        });
    }

    let scenarios = exchange
        .query(ParameterRequest::scenario_numbers())
        .await?
        .parse_scenario_numbers()?;
    for scenario in scenarios {
        let info = exchange
            .query(ParameterRequest::scenario_params(scenario))
            .await?
            .parse_scenario_params()?;
        entries.push(CatalogEntry {
            id: DeviceId::Scenario(info.id),
            kind: DeviceKind::Scenario,
            name: info.name,
            room: room_name(info.room),
        });
    }

    tracing::info!(
        rooms = rooms.len(),
        devices = entries.len(),
        "Catalog discovered"
    );
    Ok(entries)
}

async fn read_rooms<E: ParameterExchange + Sync>(
    exchange: &E,
) -> Result<HashMap<u16, String>, CoreError> {
    let ids = exchange
        .query(ParameterRequest::room_numbers())
        .await?
        .parse_room_numbers()?;
    let mut rooms = HashMap::with_capacity(ids.len());
    for id in ids {
        let room = exchange
            .query(ParameterRequest::room_params(id))
            .await?
            .parse_room_params()?;
        rooms.insert(room.id, room.name);
    }
    Ok(rooms)
}
