//! Purchase-likelihood scoring for comments.
//!
//! Eight independent keyword features contribute fixed weights; the sum is
//! clamped to `[0, 100]` and bucketed into a [`LeadLevel`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadLevel {
    High,
    Medium,
    Low,
}

impl LeadLevel {
    pub fn from_score(score: i64) -> Self {
        if score >= 70 {
            LeadLevel::High
        } else if score >= 35 {
            LeadLevel::Medium
        } else {
            LeadLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadLevel::High => "high",
            LeadLevel::Medium => "medium",
            LeadLevel::Low => "low",
        }
    }
}

impl fmt::Display for LeadLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which keyword features fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeadFeatures {
    pub buy_strong: bool,
    pub buy_weak: bool,
    pub after_sales: bool,
    pub negative: bool,
    pub question: bool,
    pub praise: bool,
    pub try_intent: bool,
    pub purchased: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadResult {
    pub score: i64,
    pub level: LeadLevel,
    pub signals: Vec<String>,
    pub next_actions: Vec<String>,
    pub features: LeadFeatures,
}

macro_rules! keyword_re {
    ($name:ident, $pattern:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($pattern).expect("valid lead pattern"));
    };
}

keyword_re!(BUY_STRONG, r"(现在买|立刻买|马上下单|链接发我|怎么买|哪里买|有优惠吗|领券|多少一套|到手价|库存|有货吗)");
keyword_re!(BUY_WEAK, r"(价格|多少钱|对比|推荐|适合我吗|规格|型号|尺码|发货|包邮|几天到|质保|售后)");
keyword_re!(AFTER_SALES, r"(退货|退款|换货|保修|维修|质量问题|坏了|投诉)");
keyword_re!(NEGATIVE, r"(垃圾|坑|骗子|智商税|差评|翻车|别买|失望)");
keyword_re!(QUESTION, r"(\?|？|请问|怎么|为什么|能不能|可以吗)");
keyword_re!(PRAISE, r"(好闻|好用|喜欢|爱了|满意|惊艳|高级|绝了|太香了|真的香|不错|很棒|推荐)");
keyword_re!(TRY_INTENT, r"(想买|准备入|准备买|想入|想试试|想尝试|入手|种草|期待|期待效果|第一次买|第一次入)");
keyword_re!(PURCHASED, r"(已买|已经买|买了|刚买|已入手|已入|已下单|下单了|到手|收到了|回购|复购|再买|囤货)");

const AFTER_SALES_ACTIONS: [&str; 2] = ["优先安抚情绪并收集问题细节", "提供明确的售后路径（不索取隐私）"];
const HIGH_ACTIONS: [&str; 3] = [
    "追问关键参数以缩短决策（规格/预算/使用场景）",
    "给出清晰的下一步（领取优惠/下单方式/库存与发货）",
    "提示可继续留言补充需求，必要时引导私信但不留外链",
];
const MEDIUM_ACTIONS: [&str; 2] = ["补充对比点与适配建议，降低疑虑", "用轻量方式告知活动信息（可选）"];
const LOW_ACTIONS: [&str; 1] = ["以互动/答疑为主，避免硬广"];

impl LeadFeatures {
    pub fn extract(text: &str) -> Self {
        let t = text.trim();
        Self {
            buy_strong: BUY_STRONG.is_match(t),
            buy_weak: BUY_WEAK.is_match(t),
            after_sales: AFTER_SALES.is_match(t),
            negative: NEGATIVE.is_match(t),
            question: QUESTION.is_match(t),
            praise: PRAISE.is_match(t),
            try_intent: TRY_INTENT.is_match(t),
            purchased: PURCHASED.is_match(t),
        }
    }

    /// `(fired, weight, signal)` per feature, in signal reporting order.
    fn weighted(&self) -> [(bool, i64, &'static str); 8] {
        [
            (self.buy_strong, 70, "强购买意向"),
            (self.buy_weak, 35, "弱购买意向"),
            (self.try_intent, 35, "试用/入手意向"),
            (self.purchased, 10, "已购/复购"),
            (self.praise, 15, "正向反馈"),
            (self.question, 10, "提问/咨询"),
            (self.after_sales, 20, "售后诉求"),
            (self.negative, -40, "负面情绪"),
        ]
    }
}

pub fn score_lead(text: &str) -> LeadResult {
    let features = LeadFeatures::extract(text);

    let mut raw = 0i64;
    let mut signals = Vec::new();
    for (fired, weight, signal) in features.weighted() {
        if fired {
            raw += weight;
            signals.push(signal.to_string());
        }
    }

    let score = raw.clamp(0, 100);
    let level = LeadLevel::from_score(score);

    LeadResult {
        score,
        level,
        signals,
        next_actions: next_actions(level, &features),
        features,
    }
}

fn next_actions(level: LeadLevel, features: &LeadFeatures) -> Vec<String> {
    let actions: &[&str] = if features.after_sales {
        &AFTER_SALES_ACTIONS
    } else {
        match level {
            LeadLevel::High => &HIGH_ACTIONS,
            LeadLevel::Medium => &MEDIUM_ACTIONS,
            LeadLevel::Low => &LOW_ACTIONS,
        }
    };
    actions.iter().map(|a| a.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strong_and_weak_clamp_to_high() {
        let r = score_lead("链接发我，多少钱？");
        assert_eq!(r.score, 100);
        assert_eq!(r.level, LeadLevel::High);
        assert!(r.features.buy_strong && r.features.buy_weak);
        assert_eq!(r.next_actions.len(), 3);
    }

    #[test]
    fn test_negative_floors_at_zero() {
        let r = score_lead("垃圾，别买");
        assert_eq!(r.score, 0);
        assert_eq!(r.level, LeadLevel::Low);
        assert_eq!(r.signals, vec!["负面情绪"]);
        assert_eq!(r.next_actions, vec!["以互动/答疑为主，避免硬广"]);
    }

    #[test]
    fn test_praise_only_is_low() {
        let r = score_lead("真的好闻");
        assert_eq!(r.score, 15);
        assert_eq!(r.level, LeadLevel::Low);
    }

    #[test]
    fn test_try_intent_is_medium() {
        let r = score_lead("我想试试这个");
        assert_eq!(r.level, LeadLevel::Medium);
        assert_eq!(r.next_actions.len(), 2);
    }

    #[test]
    fn test_first_purchase_with_praise() {
        let r = score_lead("特别好闻，第一次买看到好多好评，期待效果");
        assert!(r.score >= 35);
        assert!(r.signals.contains(&"正向反馈".to_string()));
        assert!(r.signals.contains(&"试用/入手意向".to_string()));
    }

    #[test]
    fn test_after_sales_overrides_next_actions() {
        let r = score_lead("链接发我，收到就坏了要退货");
        assert!(r.features.after_sales);
        assert_eq!(r.next_actions, AFTER_SALES_ACTIONS.to_vec());
    }

    #[test]
    fn test_all_features_stay_in_range() {
        let text = "链接发我 多少钱 想买 已买 好用 请问 退货 垃圾";
        let r = score_lead(text);
        let f = r.features;
        assert!(
            f.buy_strong
                && f.buy_weak
                && f.try_intent
                && f.purchased
                && f.praise
                && f.question
                && f.after_sales
                && f.negative
        );
        assert!((0..=100).contains(&r.score));
        assert_eq!(r.signals.len(), 8);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(LeadLevel::from_score(70), LeadLevel::High);
        assert_eq!(LeadLevel::from_score(69), LeadLevel::Medium);
        assert_eq!(LeadLevel::from_score(35), LeadLevel::Medium);
        assert_eq!(LeadLevel::from_score(34), LeadLevel::Low);
    }
}
