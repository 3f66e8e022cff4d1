//! 胜出者选择
//!
//! 在最终答案中取置信度最高者；置信度相同则最早到达者胜出，结果确定、不随机。

use std::cmp::Ordering;

use super::session::{QuerySession, ResponseRecord};

/// 从一组响应中选出胜者，忽略非最终答案
pub fn select_best<'a, I>(responses: I) -> Option<&'a ResponseRecord>
where
    I: IntoIterator<Item = &'a ResponseRecord>,
{
    let mut best: Option<&'a ResponseRecord> = None;
    for candidate in responses.into_iter().filter(|r| r.is_final()) {
        if best.map_or(true, |current| compare(candidate, current) == Ordering::Greater) {
            best = Some(candidate);
        }
    }
    best
}

/// candidate 优于 current 时返回 Greater
fn compare(candidate: &ResponseRecord, current: &ResponseRecord) -> Ordering {
    candidate
        .confidence
        .partial_cmp(&current.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| current.sequence.cmp(&candidate.sequence))
}

/// 会话的胜者 Provider ID
pub fn select_winner(session: &QuerySession) -> Option<String> {
    select_best(session.responses.values()).map(|r| r.provider_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::time::Duration;

    fn session() -> QuerySession {
        QuerySession::new("what is the speed of light".into(), None, Duration::from_secs(5))
    }

    #[test]
    fn test_highest_confidence_wins() {
        let mut s = session();
        s.record("a", false, Some("slow".into()), Some(0.2), Map::new());
        s.record("b", false, Some("fast".into()), Some(0.9), Map::new());
        s.record("c", false, Some("medium".into()), Some(0.5), Map::new());

        assert_eq!(select_winner(&s).as_deref(), Some("b"));
    }

    #[test]
    fn test_tie_goes_to_earliest_arrival() {
        let mut s = session();
        s.record("a", false, Some("first".into()), Some(0.3), Map::new());
        s.record("b", false, Some("second".into()), Some(0.3), Map::new());

        assert_eq!(select_winner(&s).as_deref(), Some("a"));
    }

    #[test]
    fn test_tie_ignores_wall_clock() {
        let mut s = session();
        s.record("a", false, Some("first".into()), Some(0.3), Map::new());
        s.record("b", false, Some("second".into()), Some(0.3), Map::new());
        // 系统时钟回拨：后到者的 received_at 反而更早
        let earlier = s.responses["a"].received_at - chrono::Duration::seconds(10);
        if let Some(b) = s.responses.get_mut("b") {
            b.received_at = earlier;
        }

        assert_eq!(select_winner(&s).as_deref(), Some("a"));
    }

    #[test]
    fn test_zero_confidence_answer_is_eligible() {
        let mut s = session();
        s.record("a", true, None, None, Map::new());
        s.record("b", false, Some("the answer is always 42".into()), Some(0.0), Map::new());

        let best = select_best(s.responses.values()).unwrap();
        assert_eq!(best.provider_id, "b");
        assert_eq!(best.confidence, 0.0);
    }

    #[test]
    fn test_no_final_answers() {
        let mut s = session();
        s.record("a", true, None, Some(0.8), Map::new());
        s.record("b", false, None, None, Map::new());

        assert!(select_winner(&s).is_none());
    }

    #[test]
    fn test_out_of_range_confidence_is_clamped() {
        let mut s = session();
        s.record("a", false, Some("x".into()), Some(7.0), Map::new());
        s.record("b", false, Some("y".into()), Some(1.0), Map::new());

        // 7.0 被截断为 1.0，与 b 平手，a 先到
        let best = select_best(s.responses.values()).unwrap();
        assert_eq!(best.provider_id, "a");
        assert!((0.0..=1.0).contains(&best.confidence));
    }
}
