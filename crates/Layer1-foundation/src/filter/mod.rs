//! PropertyFilter - 프로퍼티 맵에 대한 불리언 술어
//!
//! 동등 비교와 AND/OR 결합만 지원하는 의도적으로 작은 필터 언어입니다.
//! 로그 출력용으로 LDAP 스타일 문자열을 렌더링합니다.

use crate::types::ServiceProperties;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 프로퍼티 필터
///
/// ## 사용 예시
///
/// ```
/// use weft_foundation::filter::PropertyFilter;
/// use serde_json::json;
///
/// let filter = PropertyFilter::all_of(vec![
///     PropertyFilter::eq("env", "prod"),
///     PropertyFilter::any_of(vec![
///         PropertyFilter::eq("zone", "a"),
///         PropertyFilter::eq("zone", "b"),
///     ]),
/// ]);
///
/// let mut props = std::collections::HashMap::new();
/// props.insert("env".to_string(), json!("prod"));
/// props.insert("zone".to_string(), json!("b"));
/// assert!(filter.matches(&props));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyFilter {
    /// 키가 존재하고 값이 동등함
    Equals { key: String, value: Value },

    /// 모든 하위 필터가 참
    And(Vec<PropertyFilter>),

    /// 하위 필터 중 하나 이상이 참
    Or(Vec<PropertyFilter>),
}

impl PropertyFilter {
    /// 동등 비교 필터 생성
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            key: key.into(),
            value: value.into(),
        }
    }

    /// AND 결합 생성
    pub fn all_of(filters: Vec<PropertyFilter>) -> Self {
        Self::And(filters)
    }

    /// OR 결합 생성
    pub fn any_of(filters: Vec<PropertyFilter>) -> Self {
        Self::Or(filters)
    }

    /// 프로퍼티 맵이 필터를 만족하는지 평가
    pub fn matches(&self, properties: &ServiceProperties) -> bool {
        match self {
            Self::Equals { key, value } => properties.get(key) == Some(value),
            Self::And(filters) => filters.iter().all(|f| f.matches(properties)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(properties)),
        }
    }
}

impl std::fmt::Display for PropertyFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equals { key, value } => {
                // 문자열 값은 따옴표 없이 렌더링
                match value.as_str() {
                    Some(s) => write!(f, "({}={})", key, s),
                    None => write!(f, "({}={})", key, value),
                }
            }
            Self::And(filters) => {
                write!(f, "(&")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            Self::Or(filters) => {
                write!(f, "(|")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, Value)]) -> ServiceProperties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_equals() {
        let filter = PropertyFilter::eq("env", "prod");

        assert!(filter.matches(&props(&[("env", json!("prod"))])));
        assert!(!filter.matches(&props(&[("env", json!("dev"))])));
        assert!(!filter.matches(&props(&[])));
    }

    #[test]
    fn test_and_or() {
        let filter = PropertyFilter::all_of(vec![
            PropertyFilter::eq("env", "prod"),
            PropertyFilter::any_of(vec![
                PropertyFilter::eq("zone", "a"),
                PropertyFilter::eq("zone", "b"),
            ]),
        ]);

        assert!(filter.matches(&props(&[("env", json!("prod")), ("zone", json!("a"))])));
        assert!(filter.matches(&props(&[("env", json!("prod")), ("zone", json!("b"))])));
        assert!(!filter.matches(&props(&[("env", json!("prod")), ("zone", json!("c"))])));
        assert!(!filter.matches(&props(&[("env", json!("dev")), ("zone", json!("a"))])));
    }

    #[test]
    fn test_empty_combinators() {
        // 빈 AND는 항상 참, 빈 OR는 항상 거짓
        assert!(PropertyFilter::all_of(vec![]).matches(&props(&[])));
        assert!(!PropertyFilter::any_of(vec![]).matches(&props(&[])));
    }

    #[test]
    fn test_non_string_values() {
        let filter = PropertyFilter::eq("port", 8080);

        assert!(filter.matches(&props(&[("port", json!(8080))])));
        assert!(!filter.matches(&props(&[("port", json!("8080"))])));
    }

    #[test]
    fn test_display() {
        let filter = PropertyFilter::all_of(vec![
            PropertyFilter::eq("env", "prod"),
            PropertyFilter::eq("zone", "a"),
        ]);
        assert_eq!(filter.to_string(), "(&(env=prod)(zone=a))");

        let filter = PropertyFilter::any_of(vec![PropertyFilter::eq("port", 8080)]);
        assert_eq!(filter.to_string(), "(|(port=8080))");
    }
}
