use serde_json::Value;

use crate::types::*;
use crate::{Error, Result};

/// Description keyword marking a room sensor as a return-flow sensor.
pub const DEFAULT_RETURN_KEYWORD: &str = "R\u{00fc}cklauf";

/// Title of the controller's mobile login page, used as the discovery signature.
pub const LOGIN_TITLE: &str = "<title>Smart-Heat-OS - Login</title>";

pub const LOGIN_PATH: &str = "/accounts/m_login/";

pub fn temps_url(base_url: &str, house_id: &str) -> String {
    format!("{base_url}/get/json/v1/{house_id}/temps/")
}

pub fn set_target_url(base_url: &str, house_id: &str, room_id: &str) -> String {
    format!("{base_url}/set/json/v1/{house_id}/soll/{room_id}/")
}

/// Setpoints are sent the way the controller's own UI sends them: always with
/// a fractional part (`23.0`, `21.5`).
pub fn format_setpoint(value: f64) -> String {
    format!("{value:?}")
}

pub fn set_target_form<'a>(user: &'a str, password: &'a str, soll: &'a str) -> [(&'static str, &'a str); 3] {
    [("user", user), ("password", password), ("soll", soll)]
}

pub fn is_login_page(body: &str) -> bool {
    body.contains(LOGIN_TITLE)
}

/// Parse the temps document into floors.
///
/// Unknown fields are ignored and every metric is optional. A floor that has
/// no `raeume` but carries `temperatur`/`solltemperatur` itself is read as a
/// single room with the floor's id.
pub fn parse_temps(body: &str, return_keyword: &str) -> Result<Vec<Floor>> {
    let parsed: Value = serde_json::from_str(body)?;
    parse_temps_value(&parsed, return_keyword)
}

pub fn parse_temps_value(parsed: &Value, return_keyword: &str) -> Result<Vec<Floor>> {
    let floors = match parsed {
        Value::Array(floors) => floors,
        other => {
            return Err(Error::Parse(format!(
                "expected an array of floors, got {}",
                json_kind(other)
            )));
        }
    };

    Ok(floors
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_object())
        .map(|(index, f)| parse_floor(index, f, return_keyword))
        .collect())
}

fn parse_floor(index: usize, data: &Value, return_keyword: &str) -> Floor {
    let id = data
        .get("id")
        .and_then(id_string)
        .unwrap_or_else(|| index.to_string());
    let name = data
        .get("etagenname")
        .or_else(|| data.get("name"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Floor {id}"));

    let listed: &[Value] = match data.get("raeume") {
        Some(Value::Array(rooms)) => rooms,
        _ => &[],
    };

    let rooms = if listed.is_empty() && is_room_like(data) {
        vec![parse_room(&id, 0, data, return_keyword)]
    } else {
        listed
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_object())
            .map(|(pos, r)| parse_room(&id, pos, r, return_keyword))
            .collect()
    };

    Floor { id, name, rooms }
}

fn is_room_like(data: &Value) -> bool {
    data.get("temperatur").is_some() || data.get("solltemperatur").is_some()
}

fn parse_room(floor_id: &str, position: usize, data: &Value, return_keyword: &str) -> Room {
    let id = data
        .get("id")
        .and_then(id_string)
        .unwrap_or_else(|| format!("{floor_id}_{position}"));
    let name = data
        .get("name")
        .or_else(|| data.get("etagenname"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Room {id}"));

    let return_sensors = match data.get("sensoren") {
        Some(Value::Array(sensors)) => sensors
            .iter()
            .filter_map(|s| parse_return_sensor(s, return_keyword))
            .collect(),
        _ => Vec::new(),
    };

    Room {
        name,
        temperature: data.get("temperatur").and_then(lenient_f64),
        target_temperature: data.get("solltemperatur").and_then(lenient_f64),
        humidity: data.get("luftfeuchte").and_then(lenient_f64),
        total_offset: data.get("total_offset").and_then(lenient_f64),
        operation_mode: data.get("betriebsart").and_then(scalar_string),
        return_sensors,
        id,
    }
}

fn parse_return_sensor(data: &Value, keyword: &str) -> Option<ReturnSensor> {
    let description = data.get("beschreibung").and_then(|v| v.as_str())?;
    if keyword.is_empty() || !description.contains(keyword) {
        return None;
    }
    let name = data.get("name").and_then(scalar_string)?;
    Some(ReturnSensor {
        name,
        description: description.to_string(),
        value: data.get("wert").and_then(lenient_f64),
    })
}

/// Ids arrive as strings or bare numbers depending on firmware.
fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numbers, numeric strings (decimal comma accepted) or null.
fn lenient_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        assert_eq!(
            temps_url("http://10.0.0.5", "1"),
            "http://10.0.0.5/get/json/v1/1/temps/"
        );
        assert_eq!(
            set_target_url("http://10.0.0.5", "1", "10"),
            "http://10.0.0.5/set/json/v1/1/soll/10/"
        );
    }

    #[test]
    fn setpoint_always_has_fraction() {
        assert_eq!(format_setpoint(23.0), "23.0");
        assert_eq!(format_setpoint(21.5), "21.5");
        assert_eq!(format_setpoint(20.25), "20.25");
    }

    #[test]
    fn parse_nested_rooms() {
        let body = r#"[{"id": 1, "etagenname": "Ground", "raeume": [
            {"id": 10, "name": "Living Room", "temperatur": 21.5, "solltemperatur": 22.0,
             "luftfeuchte": 45, "total_offset": -0.5, "betriebsart": "Heizen"}
        ]}]"#;
        let floors = parse_temps(body, DEFAULT_RETURN_KEYWORD).unwrap();
        assert_eq!(floors.len(), 1);
        assert_eq!(floors[0].id, "1");
        assert_eq!(floors[0].name, "Ground");
        let room = &floors[0].rooms[0];
        assert_eq!(room.id, "10");
        assert_eq!(room.name, "Living Room");
        assert_eq!(room.temperature, Some(21.5));
        assert_eq!(room.target_temperature, Some(22.0));
        assert_eq!(room.humidity, Some(45.0));
        assert_eq!(room.total_offset, Some(-0.5));
        assert_eq!(room.operation_mode.as_deref(), Some("Heizen"));
    }

    #[test]
    fn floor_without_rooms_becomes_room() {
        let body = r#"[{"id": "3", "etagenname": "Attic", "temperatur": 18.0, "solltemperatur": 19.0}]"#;
        let floors = parse_temps(body, DEFAULT_RETURN_KEYWORD).unwrap();
        let rooms = &floors[0].rooms;
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, "3");
        assert_eq!(rooms[0].name, "Attic");
        assert_eq!(rooms[0].temperature, Some(18.0));
    }

    #[test]
    fn floor_without_rooms_or_metrics_is_empty() {
        let body = r#"[{"id": "4", "etagenname": "Cellar", "raeume": []}]"#;
        let floors = parse_temps(body, DEFAULT_RETURN_KEYWORD).unwrap();
        assert!(floors[0].rooms.is_empty());
    }

    #[test]
    fn missing_room_id_uses_position() {
        let body = r#"[{"id": "2", "raeume": [
            {"id": "20", "name": "Kitchen"},
            {"name": "Hall", "temperatur": 19.5}
        ]}]"#;
        let floors = parse_temps(body, DEFAULT_RETURN_KEYWORD).unwrap();
        assert_eq!(floors[0].rooms[1].id, "2_1");
        assert_eq!(floors[0].name, "Floor 2");
    }

    #[test]
    fn return_sensors_filtered_by_keyword() {
        let body = r#"[{"id": "1", "raeume": [{"id": "10", "sensoren": [
            {"name": "28_aa", "beschreibung": "Rücklauf Bad", "wert": "27,5"},
            {"name": "28_bb", "beschreibung": "Raumfühler", "wert": 21.0},
            {"name": "28_cc", "beschreibung": "Rücklauf Flur", "wert": null}
        ]}]}]"#;
        let floors = parse_temps(body, DEFAULT_RETURN_KEYWORD).unwrap();
        let sensors = &floors[0].rooms[0].return_sensors;
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].name, "28_aa");
        assert_eq!(sensors[0].value, Some(27.5));
        assert_eq!(sensors[1].value, None);

        let custom = parse_temps(body, "Raumf").unwrap();
        assert_eq!(custom[0].rooms[0].return_sensors[0].name, "28_bb");
    }

    #[test]
    fn null_metrics_are_absent() {
        let body = r#"[{"id": "1", "raeume": [{"id": "10", "temperatur": null}]}]"#;
        let floors = parse_temps(body, DEFAULT_RETURN_KEYWORD).unwrap();
        assert_eq!(floors[0].rooms[0].temperature, None);
    }

    #[test]
    fn rejects_non_array() {
        let err = parse_temps(r#"{"error": "no house"}"#, DEFAULT_RETURN_KEYWORD).unwrap_err();
        assert!(matches!(err, Error::Parse(ref m) if m.contains("an object")));
        assert!(matches!(
            parse_temps("<html>", DEFAULT_RETURN_KEYWORD),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn login_signature() {
        assert!(is_login_page(
            "<html><head><title>Smart-Heat-OS - Login</title></head></html>"
        ));
        assert!(!is_login_page("<html><head><title>Router</title></head></html>"));
    }
}
