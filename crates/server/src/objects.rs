//! Identity objects and the other object shapes the front door reads and writes.
//!
//! Every stored thing is an [`Item`]: a tagged variant over actors (identity
//! objects), activities, collections and links. Code that needs a concrete
//! shape matches on the discriminant once instead of probing types.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Fragment of the key identifier assigned at provisioning time.
pub const MAIN_KEY_FRAGMENT: &str = "main";

/// Path segment under the principal where resolved clients live.
pub const CLIENTS_SEGMENT: &str = "clients";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorType {
    Person,
    Application,
}

/// The public half of an identity's signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    pub id: Url,
    pub owner: Url,
    pub public_key_pem: String,
}

/// An identity object: the principal, a person, or an OAuth2 client application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: Url,
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKey>,
    /// Alternate URLs the identity is known by.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub url: Vec<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributed_to: Option<Url>,
}

impl Actor {
    pub fn new(id: Url, actor_type: ActorType, name: impl Into<String>) -> Self {
        Self {
            id,
            actor_type,
            name: name.into(),
            preferred_username: None,
            public_key: None,
            url: Vec::new(),
            attributed_to: None,
        }
    }

    /// Key identifier `<id>#main`.
    pub fn main_key_id(&self) -> Url {
        self.key_id(MAIN_KEY_FRAGMENT)
    }

    pub fn key_id(&self, fragment: &str) -> Url {
        let mut key_id = self.id.clone();
        key_id.set_fragment(Some(fragment));
        key_id
    }

    pub fn outbox(&self) -> Url {
        child_iri(&self.id, "outbox")
    }

    /// Replaces the public-key record, keeping the identifier stable.
    pub fn rotate_key(&mut self, fragment: &str, public_key_pem: String) {
        self.public_key = Some(PublicKey {
            id: self.key_id(fragment),
            owner: self.id.clone(),
            public_key_pem,
        });
    }

    /// Clones this identity under a new identifier, rewiring links that pointed
    /// at the old one. The old identifier is kept as an alternate URL.
    pub fn moved_to(&self, new_id: Url) -> Actor {
        let mut moved = self.clone();
        moved.id = new_id;
        if let Some(key) = moved.public_key.take() {
            let fragment = key.id.fragment().unwrap_or(MAIN_KEY_FRAGMENT).to_string();
            moved.rotate_key(&fragment, key.public_key_pem);
        }
        if !moved.url.contains(&self.id) {
            moved.url.push(self.id.clone());
        }
        moved
    }

    /// Adds an alternate URL unless it is already present.
    pub fn push_url(&mut self, url: Url) {
        if url != self.id && !self.url.contains(&url) {
            self.url.push(url);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
    Create,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Url,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub actor: Url,
    pub object: Url,
    /// URLs the activity targets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub url: Vec<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Url>,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Actor,
    Activity,
    Collection,
    Link,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Actor => "actor",
            ItemKind::Activity => "activity",
            ItemKind::Collection => "collection",
            ItemKind::Link => "link",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Item {
    Actor(Actor),
    Activity(Activity),
    Collection(Collection),
    Link(Link),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Actor(_) => ItemKind::Actor,
            Item::Activity(_) => ItemKind::Activity,
            Item::Collection(_) => ItemKind::Collection,
            Item::Link(_) => ItemKind::Link,
        }
    }

    pub fn iri(&self) -> Option<&Url> {
        match self {
            Item::Actor(actor) => Some(&actor.id),
            Item::Activity(activity) => Some(&activity.id),
            Item::Collection(collection) => collection.id.as_ref(),
            Item::Link(link) => Some(&link.href),
        }
    }

    /// The vocabulary type name (`Application`, `Create`, ...).
    pub fn type_name(&self) -> String {
        match self {
            Item::Actor(actor) => format!("{:?}", actor.actor_type),
            Item::Activity(activity) => format!("{:?}", activity.activity_type),
            Item::Collection(_) => "Collection".to_string(),
            Item::Link(_) => "Link".to_string(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Item::Actor(actor) => Some(&actor.name),
            Item::Link(link) => link.name.as_deref(),
            Item::Activity(_) | Item::Collection(_) => None,
        }
    }

    pub fn urls(&self) -> &[Url] {
        match self {
            Item::Actor(actor) => &actor.url,
            Item::Activity(activity) => &activity.url,
            Item::Collection(_) | Item::Link(_) => &[],
        }
    }

    /// Flattens the item into the identity objects it holds, in order.
    pub fn into_actors(self) -> Vec<Actor> {
        match self {
            Item::Actor(actor) => vec![actor],
            Item::Collection(collection) => collection
                .items
                .into_iter()
                .flat_map(Item::into_actors)
                .collect(),
            Item::Activity(_) | Item::Link(_) => Vec::new(),
        }
    }
}

impl From<Actor> for Item {
    fn from(actor: Actor) -> Self {
        Item::Actor(actor)
    }
}

impl From<Activity> for Item {
    fn from(activity: Activity) -> Self {
        Item::Activity(activity)
    }
}

/// `parent` with `segment` appended to its path; query and fragment dropped.
pub fn child_iri(parent: &Url, segment: &str) -> Url {
    let mut child = parent.clone();
    child.set_fragment(None);
    child.set_query(None);
    let path = format!("{}/{}", parent.path().trim_end_matches('/'), segment);
    child.set_path(&path);
    child
}

/// Deterministic identifier of the identity representing a resolved client.
pub fn client_iri(principal: &Url, software_id: &Uuid) -> Url {
    child_iri(&child_iri(principal, CLIENTS_SEGMENT), &software_id.to_string())
}

/// Local OAuth2 client id for an identity: its last path segment, or its host.
pub fn client_id_for(iri: &Url) -> String {
    iri.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_string)
        .or_else(|| iri.host_str().map(str::to_string))
        .unwrap_or_else(|| iri.to_string())
}

/// Whether a client identifier looks like a URL naming a remote client.
pub fn is_client_identifier_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| !url.scheme().is_empty() && url.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}
