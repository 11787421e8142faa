//! Cache types and structured set keys
//!
//! Every set record is identified by `(cache_type, key)` where the key is a
//! one-field JSON object such as `{"word":"miku"}` or `{"mode":"day"}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CacheError;
use crate::models::{CacheEntity, EntityKind, Illust, User};

// == Ranking Mode ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    Day,
    Week,
    Month,
    DayMale,
    DayFemale,
    WeekOriginal,
    WeekRookie,
    DayManga,
}

impl RankingMode {
    pub const ALL: [RankingMode; 8] = [
        RankingMode::Day,
        RankingMode::Week,
        RankingMode::Month,
        RankingMode::DayMale,
        RankingMode::DayFemale,
        RankingMode::WeekOriginal,
        RankingMode::WeekRookie,
        RankingMode::DayManga,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RankingMode::Day => "day",
            RankingMode::Week => "week",
            RankingMode::Month => "month",
            RankingMode::DayMale => "day_male",
            RankingMode::DayFemale => "day_female",
            RankingMode::WeekOriginal => "week_original",
            RankingMode::WeekRookie => "week_rookie",
            RankingMode::DayManga => "day_manga",
        }
    }
}

impl FromStr for RankingMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RankingMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| CacheError::InvalidRequest(format!("unknown ranking mode: {}", s)))
    }
}

// == Cache Type ==
/// The set cache families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    SearchIllust,
    SearchUser,
    UserIllusts,
    UserBookmarks,
    RelatedIllusts,
    IllustRanking,
    Other,
}

impl CacheType {
    pub const ALL: [CacheType; 7] = [
        CacheType::SearchIllust,
        CacheType::SearchUser,
        CacheType::UserIllusts,
        CacheType::UserBookmarks,
        CacheType::RelatedIllusts,
        CacheType::IllustRanking,
        CacheType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::SearchIllust => "search_illust",
            CacheType::SearchUser => "search_user",
            CacheType::UserIllusts => "user_illusts",
            CacheType::UserBookmarks => "user_bookmarks",
            CacheType::RelatedIllusts => "related_illusts",
            CacheType::IllustRanking => "illust_ranking",
            CacheType::Other => "other",
        }
    }

    /// Which detail cache the members resolve against.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            CacheType::SearchUser => EntityKind::User,
            _ => EntityKind::Illust,
        }
    }

    /// Ranked sets keep member order and assign ranks on append.
    pub fn is_ranked(&self) -> bool {
        matches!(self, CacheType::IllustRanking)
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Record Family ==
/// A group of records that shares one TTL and one retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordFamily {
    IllustDetail,
    UserDetail,
    Download,
    Set(CacheType),
}

impl RecordFamily {
    pub fn detail(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Illust => RecordFamily::IllustDetail,
            EntityKind::User => RecordFamily::UserDetail,
        }
    }

    /// Every family, details and downloads first.
    pub fn all() -> Vec<RecordFamily> {
        let mut families = vec![
            RecordFamily::IllustDetail,
            RecordFamily::UserDetail,
            RecordFamily::Download,
        ];
        families.extend(CacheType::ALL.into_iter().map(RecordFamily::Set));
        families
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordFamily::IllustDetail => "illust_detail",
            RecordFamily::UserDetail => "user_detail",
            RecordFamily::Download => "download",
            RecordFamily::Set(cache_type) => cache_type.as_str(),
        }
    }
}

impl fmt::Display for RecordFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Set Key ==
/// Canonical JSON encoding of a structured set key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SetKey(String);

impl SetKey {
    fn single(field: &str, value: Value) -> Self {
        let mut map = serde_json::Map::new();
        map.insert(field.to_string(), value);
        SetKey(Value::Object(map).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_json(&self) -> Value {
        serde_json::from_str(&self.0).unwrap_or(Value::Null)
    }
}

impl fmt::Display for SetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// == Set Queries ==
/// A set cache address: cache type plus structured key, typed by member entity.
pub trait SetQuery: fmt::Debug + Send + Sync {
    type Entity: CacheEntity;

    fn cache_type(&self) -> CacheType;

    fn key(&self) -> SetKey;
}

/// Set caches whose members are illustrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IllustSetQuery {
    SearchIllust { word: String },
    UserIllusts { user_id: i64 },
    UserBookmarks { user_id: i64 },
    RelatedIllusts { original_illust_id: i64 },
    IllustRanking { mode: RankingMode },
    RecommendedIllusts,
}

impl IllustSetQuery {
    pub fn search(word: impl Into<String>) -> Self {
        IllustSetQuery::SearchIllust { word: word.into() }
    }

    pub fn user_illusts(user_id: i64) -> Self {
        IllustSetQuery::UserIllusts { user_id }
    }

    pub fn user_bookmarks(user_id: i64) -> Self {
        IllustSetQuery::UserBookmarks { user_id }
    }

    pub fn related(original_illust_id: i64) -> Self {
        IllustSetQuery::RelatedIllusts { original_illust_id }
    }

    pub fn ranking(mode: RankingMode) -> Self {
        IllustSetQuery::IllustRanking { mode }
    }
}

impl SetQuery for IllustSetQuery {
    type Entity = Illust;

    fn cache_type(&self) -> CacheType {
        match self {
            IllustSetQuery::SearchIllust { .. } => CacheType::SearchIllust,
            IllustSetQuery::UserIllusts { .. } => CacheType::UserIllusts,
            IllustSetQuery::UserBookmarks { .. } => CacheType::UserBookmarks,
            IllustSetQuery::RelatedIllusts { .. } => CacheType::RelatedIllusts,
            IllustSetQuery::IllustRanking { .. } => CacheType::IllustRanking,
            IllustSetQuery::RecommendedIllusts => CacheType::Other,
        }
    }

    fn key(&self) -> SetKey {
        match self {
            IllustSetQuery::SearchIllust { word } => SetKey::single("word", json!(word)),
            IllustSetQuery::UserIllusts { user_id } | IllustSetQuery::UserBookmarks { user_id } => {
                SetKey::single("user_id", json!(user_id))
            }
            IllustSetQuery::RelatedIllusts { original_illust_id } => {
                SetKey::single("original_illust_id", json!(original_illust_id))
            }
            IllustSetQuery::IllustRanking { mode } => SetKey::single("mode", json!(mode.as_str())),
            IllustSetQuery::RecommendedIllusts => {
                SetKey::single("type", json!("recommended_illusts"))
            }
        }
    }
}

/// Set caches whose members are users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserSetQuery {
    SearchUser { word: String },
}

impl UserSetQuery {
    pub fn search(word: impl Into<String>) -> Self {
        UserSetQuery::SearchUser { word: word.into() }
    }
}

impl SetQuery for UserSetQuery {
    type Entity = User;

    fn cache_type(&self) -> CacheType {
        match self {
            UserSetQuery::SearchUser { .. } => CacheType::SearchUser,
        }
    }

    fn key(&self) -> SetKey {
        match self {
            UserSetQuery::SearchUser { word } => SetKey::single("word", json!(word)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_canonical_json() {
        assert_eq!(
            IllustSetQuery::search("miku").key().as_str(),
            r#"{"word":"miku"}"#
        );
        assert_eq!(
            IllustSetQuery::ranking(RankingMode::WeekRookie).key().as_str(),
            r#"{"mode":"week_rookie"}"#
        );
        assert_eq!(
            IllustSetQuery::RecommendedIllusts.key().to_json()["type"],
            "recommended_illusts"
        );
    }

    #[test]
    fn test_same_key_different_cache_types() {
        let illusts = IllustSetQuery::user_illusts(11);
        let bookmarks = IllustSetQuery::user_bookmarks(11);
        assert_eq!(illusts.key(), bookmarks.key());
        assert_ne!(illusts.cache_type(), bookmarks.cache_type());
    }

    #[test]
    fn test_word_key_escapes() {
        let key = IllustSetQuery::search("a\"b").key();
        assert_eq!(key.to_json()["word"], "a\"b");
    }

    #[test]
    fn test_cache_type_properties() {
        assert!(CacheType::IllustRanking.is_ranked());
        assert!(!CacheType::SearchIllust.is_ranked());
        assert_eq!(CacheType::SearchUser.entity_kind(), EntityKind::User);
        assert_eq!(CacheType::Other.entity_kind(), EntityKind::Illust);
        assert_eq!(UserSetQuery::search("x").cache_type(), CacheType::SearchUser);
    }

    #[test]
    fn test_record_families_are_distinct() {
        let families = RecordFamily::all();
        assert_eq!(families.len(), 10);
        let names: std::collections::HashSet<_> = families.iter().map(|f| f.as_str()).collect();
        assert_eq!(names.len(), 10);
        assert_eq!(RecordFamily::detail(EntityKind::User), RecordFamily::UserDetail);
    }

    #[test]
    fn test_ranking_mode_from_str() {
        assert_eq!("day_male".parse::<RankingMode>().unwrap(), RankingMode::DayMale);
        assert!("yearly".parse::<RankingMode>().is_err());
    }
}
