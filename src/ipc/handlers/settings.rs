use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Appearance,
    Notifications,
    Billing,
    Profile,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "appearance" => Some(Self::Appearance),
            "notifications" => Some(Self::Notifications),
            "billing" => Some(Self::Billing),
            "profile" => Some(Self::Profile),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Appearance => "setup.appearance",
            Self::Notifications => "setup.notifications",
            Self::Billing => "setup.billing",
            Self::Profile => "setup.profile",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Appearance => json!({
            "theme": "system",
            "primaryColor": "blue",
            "brightness": 100,
            "volume": 100,
            "backgroundColor": ""
        }),
        SetupSection::Notifications => json!({
            "email": true,
            "push": false
        }),
        SetupSection::Billing => json!({
            "tuitionPerStudent": 1500.0,
            "currencySymbol": "₱"
        }),
        SetupSection::Profile => json!({
            "name": "Teacher",
            "photoUrl": null
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_nullable_string_max(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = parse_string_max(v, key, max_len)?;
    Ok(Value::String(s))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Appearance => match k.as_str() {
                "theme" => {
                    let t = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if t != "system" && t != "light" && t != "dark" {
                        return Err("theme must be one of: system, light, dark".into());
                    }
                    obj.insert(k.clone(), Value::String(t));
                }
                "primaryColor" => {
                    let c = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if c != "blue" && c != "green" && c != "purple" && c != "pink" {
                        return Err(
                            "primaryColor must be one of: blue, green, purple, pink".into()
                        );
                    }
                    obj.insert(k.clone(), Value::String(c));
                }
                "brightness" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 50, 100)?));
                }
                "volume" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 100)?));
                }
                "backgroundColor" => {
                    // Empty string selects the stock background, null clears too.
                    obj.insert(k.clone(), parse_nullable_string_max(v, k, 32)?);
                }
                _ => return Err(format!("unknown appearance field: {}", k)),
            },
            SetupSection::Notifications => match k.as_str() {
                "email" | "push" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown notifications field: {}", k)),
            },
            SetupSection::Billing => match k.as_str() {
                "tuitionPerStudent" => {
                    let n = v
                        .as_f64()
                        .ok_or_else(|| format!("{} must be a number", k))?;
                    if !n.is_finite() || n <= 0.0 {
                        return Err(format!("{} must be positive", k));
                    }
                    obj.insert(k.clone(), json!(n));
                }
                "currencySymbol" => {
                    let s = parse_string_max(v, k, 8)?;
                    if s.is_empty() {
                        return Err(format!("{} must not be empty", k));
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown billing field: {}", k)),
            },
            SetupSection::Profile => match k.as_str() {
                "name" => {
                    let s = parse_string_max(v, k, 120)?;
                    if s.is_empty() {
                        return Err(format!("{} must not be empty", k));
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "photoUrl" => {
                    // Uploaded photos arrive as data URLs, so the cap is generous.
                    obj.insert(k.clone(), parse_nullable_string_max(v, k, 2_000_000)?);
                }
                _ => return Err(format!("unknown profile field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block the settings UI.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let appearance = match load_section(conn, SetupSection::Appearance) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let notifications = match load_section(conn, SetupSection::Notifications) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let billing = match load_section(conn, SetupSection::Billing) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let profile = match load_section(conn, SetupSection::Profile) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "appearance": appearance,
            "notifications": notifications,
            "billing": billing,
            "profile": profile
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
