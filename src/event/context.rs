use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::net::IpAddr;

/// Common metadata attached to messages and batches.
///
/// The structured children below are serialized as named objects inside
/// `context`; the free-form `extra` map is inlined at the top level of the
/// serialized object, with structured keys winning on collision. There is no
/// `extra` key in the wire representation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Context {
    pub app: AppInfo,
    pub campaign: CampaignInfo,
    pub device: DeviceInfo,
    pub ip: Option<IpAddr>,
    pub library: LibraryInfo,
    pub location: LocationInfo,
    pub network: NetworkInfo,
    pub os: OsInfo,
    pub page: PageInfo,
    pub referrer: ReferrerInfo,
    pub screen: ScreenInfo,
    pub locale: String,
    pub timezone: String,
    pub user_agent: String,
    pub traits: Map<String, Value>,

    /// Extensions to the standard context layout. Inlined at the top level
    /// of the serialized context object.
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Historically sent as either a JSON number or a string; stored as the
    /// lexical form either way.
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "de_string_or_number"
    )]
    pub build: String,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub medium: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub term: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manufacturer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub latitude: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bluetooth: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cellular: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wifi: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub carrier: String,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub referrer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub search: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferrerInfo {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenInfo {
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub density: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub width: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub height: i64,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

/// Accepts a JSON string or number and keeps the lexical form.
fn de_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

impl AppInfo {
    fn is_empty(&self) -> bool {
        self.name.is_empty() && self.version.is_empty() && self.build.is_empty()
    }
}

impl LibraryInfo {
    fn is_empty(&self) -> bool {
        self.name.is_empty() && self.version.is_empty()
    }
}

impl Context {
    /// True when nothing would be serialized for this context.
    pub fn is_empty(&self) -> bool {
        self == &Context::default()
    }

    fn insert_child<T: Serialize, S: Serializer>(
        map: &mut Map<String, Value>,
        key: &str,
        child: &T,
    ) -> Result<(), S::Error> {
        let value = serde_json::to_value(child).map_err(serde::ser::Error::custom)?;
        map.insert(key.to_owned(), value);
        Ok(())
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Extensions go in first so the structured fields override colliding
        // keys.
        let mut m = self.extra.clone();

        if !self.app.is_empty() {
            Context::insert_child::<_, S>(&mut m, "app", &self.app)?;
        }
        if self.campaign != CampaignInfo::default() {
            Context::insert_child::<_, S>(&mut m, "campaign", &self.campaign)?;
        }
        if self.device != DeviceInfo::default() {
            Context::insert_child::<_, S>(&mut m, "device", &self.device)?;
        }
        if let Some(ip) = self.ip {
            m.insert("ip".to_owned(), Value::String(ip.to_string()));
        }
        if !self.library.is_empty() {
            Context::insert_child::<_, S>(&mut m, "library", &self.library)?;
        }
        if self.location != LocationInfo::default() {
            Context::insert_child::<_, S>(&mut m, "location", &self.location)?;
        }
        if self.network != NetworkInfo::default() {
            Context::insert_child::<_, S>(&mut m, "network", &self.network)?;
        }
        if self.os != OsInfo::default() {
            Context::insert_child::<_, S>(&mut m, "os", &self.os)?;
        }
        if self.page != PageInfo::default() {
            Context::insert_child::<_, S>(&mut m, "page", &self.page)?;
        }
        if self.referrer != ReferrerInfo::default() {
            Context::insert_child::<_, S>(&mut m, "referrer", &self.referrer)?;
        }
        if self.screen != ScreenInfo::default() {
            Context::insert_child::<_, S>(&mut m, "screen", &self.screen)?;
        }
        if !self.locale.is_empty() {
            m.insert("locale".to_owned(), Value::String(self.locale.clone()));
        }
        if !self.timezone.is_empty() {
            m.insert("timezone".to_owned(), Value::String(self.timezone.clone()));
        }
        if !self.user_agent.is_empty() {
            m.insert(
                "userAgent".to_owned(),
                Value::String(self.user_agent.clone()),
            );
        }
        if !self.traits.is_empty() {
            m.insert("traits".to_owned(), Value::Object(self.traits.clone()));
        }

        let mut out = serializer.serialize_map(Some(m.len()))?;
        for (k, v) in &m {
            out.serialize_entry(k, v)?;
        }
        out.end()
    }
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut m = Map::<String, Value>::deserialize(deserializer)?;
        let mut ctx = Context::default();

        fn child<'de, T: serde::de::DeserializeOwned, D: Deserializer<'de>>(
            m: &mut Map<String, Value>,
            key: &str,
        ) -> Result<Option<T>, D::Error> {
            match m.remove(key) {
                Some(v) => serde_json::from_value(v)
                    .map(Some)
                    .map_err(de::Error::custom),
                None => Ok(None),
            }
        }

        if let Some(v) = child::<AppInfo, D>(&mut m, "app")? {
            ctx.app = v;
        }
        if let Some(v) = child::<CampaignInfo, D>(&mut m, "campaign")? {
            ctx.campaign = v;
        }
        if let Some(v) = child::<DeviceInfo, D>(&mut m, "device")? {
            ctx.device = v;
        }
        if let Some(v) = child::<IpAddr, D>(&mut m, "ip")? {
            ctx.ip = Some(v);
        }
        if let Some(v) = child::<LibraryInfo, D>(&mut m, "library")? {
            ctx.library = v;
        }
        if let Some(v) = child::<LocationInfo, D>(&mut m, "location")? {
            ctx.location = v;
        }
        if let Some(v) = child::<NetworkInfo, D>(&mut m, "network")? {
            ctx.network = v;
        }
        if let Some(v) = child::<OsInfo, D>(&mut m, "os")? {
            ctx.os = v;
        }
        if let Some(v) = child::<PageInfo, D>(&mut m, "page")? {
            ctx.page = v;
        }
        if let Some(v) = child::<ReferrerInfo, D>(&mut m, "referrer")? {
            ctx.referrer = v;
        }
        if let Some(v) = child::<ScreenInfo, D>(&mut m, "screen")? {
            ctx.screen = v;
        }
        if let Some(v) = child::<String, D>(&mut m, "locale")? {
            ctx.locale = v;
        }
        if let Some(v) = child::<String, D>(&mut m, "timezone")? {
            ctx.timezone = v;
        }
        if let Some(v) = child::<String, D>(&mut m, "userAgent")? {
            ctx.user_agent = v;
        }
        if let Some(v) = child::<Map<String, Value>, D>(&mut m, "traits")? {
            ctx.traits = v;
        }

        // Whatever is left over is an extension.
        ctx.extra = m;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_is_inlined_and_loses_collisions() {
        let mut ctx = Context {
            locale: "en-US".to_owned(),
            ..Context::default()
        };
        ctx.extra
            .insert("whatever".to_owned(), json!({"here": true}));
        ctx.extra.insert("locale".to_owned(), json!("fr-FR"));

        let v = serde_json::to_value(&ctx).unwrap();
        assert_eq!(v, json!({"locale": "en-US", "whatever": {"here": true}}));
    }

    #[test]
    fn app_build_accepts_number_and_string() {
        let ctx: Context = serde_json::from_value(json!({"app": {"build": 42}})).unwrap();
        assert_eq!(ctx.app.build, "42");

        let ctx: Context = serde_json::from_value(json!({"app": {"build": "7.1"}})).unwrap();
        assert_eq!(ctx.app.build, "7.1");
    }

    #[test]
    fn unknown_keys_round_trip_through_extra() {
        let input = json!({
            "library": {"name": "analytics-relay", "version": "3.0.0"},
            "vendor": {"custom": 1}
        });
        let ctx: Context = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(ctx.library.name, "analytics-relay");
        assert_eq!(ctx.extra["vendor"], json!({"custom": 1}));
        assert_eq!(serde_json::to_value(&ctx).unwrap(), input);
    }
}
