//! Source field alias tables.
//!
//! Legacy exports spell the same field many ways (`startTime`,
//! `start_time`, `StartTime`, ...). Each canonical target field lists its
//! candidate source keys in priority order and the first present,
//! non-empty one wins. Fields with no candidates are only ever filled from
//! task overrides or parent ids.

use crate::model::{scalar_to_string, EntityType, ParentField, SourceRecord};
use serde_json::Value;

/// Candidate source keys for one canonical target field.
#[derive(Debug, Clone, Copy)]
pub struct FieldAlias {
    pub field: &'static str,
    pub candidates: &'static [&'static str],
}

/// Alias table for one entity type.
#[derive(Debug, Clone, Copy)]
pub struct EntityAliases {
    pub entity: EntityType,
    /// Candidate keys for the legacy identifier (`sourceSystemId`).
    pub source_id: &'static [&'static str],
    /// Parent ids injected into create payloads.
    pub parents: &'static [ParentField],
    pub fields: &'static [FieldAlias],
}

const fn alias(field: &'static str, candidates: &'static [&'static str]) -> FieldAlias {
    FieldAlias { field, candidates }
}

const DESCRIPTION: &[&str] = &["description", "Description", "desc", "details", "summary"];
const STARTS_AT: &[&str] = &[
    "startsAt", "starts_at", "startTime", "start_time", "StartTime", "start", "Start", "begin",
];
const ENDS_AT: &[&str] = &[
    "endsAt", "ends_at", "endTime", "end_time", "EndTime", "end", "End", "finish",
];

static ROOM: EntityAliases = EntityAliases {
    entity: EntityType::Room,
    source_id: &["id", "Id", "ID", "roomId", "room_id", "RoomId", "legacyId"],
    parents: &[ParentField::Event, ParentField::Location],
    fields: &[
        alias("name", &["name", "Name", "roomName", "RoomName", "room_name", "title", "Title"]),
        alias("description", DESCRIPTION),
        alias("capacity", &["capacity", "Capacity", "seats", "maxCapacity", "max_capacity"]),
        alias("sortOrder", &["sortOrder", "sort_order", "order", "position", "Position"]),
    ],
};

static SESSION: EntityAliases = EntityAliases {
    entity: EntityType::Session,
    source_id: &["id", "Id", "ID", "sessionId", "session_id", "SessionId"],
    parents: &[ParentField::Event, ParentField::Room],
    fields: &[
        alias("name", &["name", "Name", "title", "Title", "sessionName", "session_name"]),
        alias("description", &["description", "Description", "abstract", "Abstract", "summary"]),
        alias("startsAt", STARTS_AT),
        alias("endsAt", ENDS_AT),
        alias("sessionType", &["sessionType", "session_type", "type", "Type", "format"]),
        alias("externalUrl", &["externalUrl", "external_url", "url", "link", "streamUrl"]),
        alias("language", &["language", "Language", "lang"]),
    ],
};

static SUB_SESSION: EntityAliases = EntityAliases {
    entity: EntityType::SubSession,
    source_id: &["id", "Id", "ID", "subSessionId", "sub_session_id", "SubSessionId"],
    parents: &[ParentField::Event, ParentField::Session],
    fields: &[
        alias("name", &["name", "Name", "title", "Title"]),
        alias("description", DESCRIPTION),
        alias("startsAt", STARTS_AT),
        alias("endsAt", ENDS_AT),
        // position in the source list, set by the orchestrator
        alias("order", &[]),
    ],
};

static USER: EntityAliases = EntityAliases {
    entity: EntityType::User,
    source_id: &["id", "Id", "ID", "userId", "user_id", "UserId", "personId"],
    parents: &[ParentField::Event],
    fields: &[
        alias("email", &["email", "Email", "emailAddress", "email_address", "mail"]),
        alias(
            "firstName",
            &["firstName", "first_name", "FirstName", "givenName", "given_name", "forename"],
        ),
        alias(
            "lastName",
            &["lastName", "last_name", "LastName", "familyName", "family_name", "surname"],
        ),
        alias(
            "company",
            &["company", "Company", "organization", "organisation", "org", "employer"],
        ),
        alias("jobTitle", &["jobTitle", "job_title", "JobTitle", "position", "title"]),
        alias("phone", &["phone", "Phone", "phoneNumber", "phone_number", "mobile"]),
        alias("bio", &["bio", "Bio", "biography", "about"]),
        alias(
            "avatarUrl",
            &["avatarUrl", "avatar_url", "photoUrl", "photo_url", "picture"],
        ),
    ],
};

static MODERATOR_LINK: EntityAliases = EntityAliases {
    entity: EntityType::ModeratorLink,
    // composite key built from the user and room refs
    source_id: &[],
    parents: &[ParentField::Event, ParentField::Room, ParentField::User],
    fields: &[alias("role", &[])],
};

static FILE_ASSET: EntityAliases = EntityAliases {
    entity: EntityType::FileAsset,
    source_id: &["id", "Id", "ID", "fileId", "file_id", "FileId", "documentId"],
    parents: &[ParentField::Event, ParentField::Room],
    fields: &[
        alias("name", &["name", "Name", "fileName", "file_name", "filename", "title"]),
        alias("mimeType", &["mimeType", "mime_type", "contentType", "content_type"]),
        alias("size", &["size", "Size", "fileSize", "file_size", "bytes", "length"]),
        alias("description", &["description", "Description", "caption"]),
        alias("url", &[]),
        alias("blobId", &[]),
    ],
};

const FILE_REF: &[&str] = &[
    "fileRef", "file_ref", "storageKey", "storage_key", "path", "downloadPath", "download_path",
];
const MODERATOR_FLAG: &[&str] = &["isModerator", "is_moderator", "IsModerator", "moderator", "Moderator"];
const ROLE: &[&str] = &["moderatorRole", "moderator_role", "role", "Role", "userRole", "user_role"];

/// Roles accepted on a moderator link.
pub const MODERATOR_ROLES: &[&str] = &["moderator", "chair", "host"];

/// Alias table for an entity type.
pub fn aliases_for(entity: EntityType) -> &'static EntityAliases {
    match entity {
        EntityType::Room => &ROOM,
        EntityType::Session => &SESSION,
        EntityType::SubSession => &SUB_SESSION,
        EntityType::User => &USER,
        EntityType::ModeratorLink => &MODERATOR_LINK,
        EntityType::FileAsset => &FILE_ASSET,
    }
}

/// Returns true when a value counts as "present" for alias resolution.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

/// First present, non-empty value among the candidates.
pub fn resolve<'r>(record: &'r SourceRecord, candidates: &[&str]) -> Option<&'r Value> {
    candidates
        .iter()
        .filter_map(|key| record.get(key))
        .find(|value| is_present(value))
}

/// Returns true when some candidate is explicitly `null` in the record.
pub fn has_explicit_null(record: &SourceRecord, candidates: &[&str]) -> bool {
    candidates
        .iter()
        .any(|key| matches!(record.get(key), Some(Value::Null)))
}

/// Legacy identifier of a record as a string.
pub fn source_id(record: &SourceRecord, entity: EntityType) -> Option<String> {
    aliases_for(entity)
        .source_id
        .iter()
        .filter_map(|key| record.get(key))
        .find_map(scalar_to_string)
}

/// Resolved `name` of a record, for entities that have one.
pub fn display_name(record: &SourceRecord, entity: EntityType) -> Option<String> {
    aliases_for(entity)
        .fields
        .iter()
        .find(|alias| alias.field == "name")
        .and_then(|alias| resolve(record, alias.candidates))
        .and_then(scalar_to_string)
}

/// Reference used to address a room's children in the source system.
///
/// Rooms without a legacy id fall back to their name.
pub fn room_ref(record: &SourceRecord) -> Option<String> {
    source_id(record, EntityType::Room).or_else(|| display_name(record, EntityType::Room))
}

/// Reference used to download a file's content.
pub fn file_ref(record: &SourceRecord) -> Option<String> {
    FILE_REF
        .iter()
        .filter_map(|key| record.get(key))
        .find_map(scalar_to_string)
        .or_else(|| source_id(record, EntityType::FileAsset))
}

/// Moderator role of a user record, or `None` when the user does not
/// moderate the room.
///
/// An explicit truthy moderator flag yields the record's role when it is
/// an accepted one, otherwise `"moderator"`. Without a flag, the role field
/// alone decides.
pub fn moderator_role(record: &SourceRecord) -> Option<&'static str> {
    let role = resolve(record, ROLE)
        .and_then(Value::as_str)
        .map(|r| r.trim().to_ascii_lowercase())
        .and_then(|r| MODERATOR_ROLES.iter().copied().find(|known| *known == r));

    match resolve(record, MODERATOR_FLAG) {
        Some(flag) if is_truthy(flag) => Some(role.unwrap_or("moderator")),
        Some(_) => None,
        None => role,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "1"
        ),
        _ => false,
    }
}
