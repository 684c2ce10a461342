//! Rule-based comment intent classification.
//!
//! Rules are evaluated in table order and the first match wins:
//!
//! | # | Intent | Confidence | Fires on |
//! |---|--------|-----------:|----------|
//! | 1 | `empty` | 0.90 | blank or whitespace-only text |
//! | 2 | `after_sales` | 0.85 | returns, refunds, quality or skin-reaction terms |
//! | 3 | `buy_intent` | 0.85 | where to buy, price, stock, shipping, coupons |
//! | 4 | `complaint` | 0.80 | negative sentiment |
//! | 5 | `praise` | 0.75 | compliments |
//! | 6 | `question` | 0.70 | question marks and interrogatives |
//! | 7 | `chat` | 0.55 | anything else |

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TriageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Empty,
    AfterSales,
    BuyIntent,
    Complaint,
    Praise,
    Question,
    Chat,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Empty => "empty",
            Intent::AfterSales => "after_sales",
            Intent::BuyIntent => "buy_intent",
            Intent::Complaint => "complaint",
            Intent::Praise => "praise",
            Intent::Question => "question",
            Intent::Chat => "chat",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "empty" => Ok(Intent::Empty),
            "after_sales" => Ok(Intent::AfterSales),
            "buy_intent" => Ok(Intent::BuyIntent),
            "complaint" => Ok(Intent::Complaint),
            "praise" => Ok(Intent::Praise),
            "question" => Ok(Intent::Question),
            "chat" => Ok(Intent::Chat),
            other => Err(TriageError::invalid(format!("unknown intent: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
    /// Identifier of the rule that fired.
    pub reasons: Vec<String>,
}

/// One row of the precedence table.
pub struct IntentRule {
    pub intent: Intent,
    pub pattern: Regex,
    pub confidence: f64,
    pub reason: &'static str,
}

const EMPTY_CONFIDENCE: f64 = 0.9;
const FALLBACK_CONFIDENCE: f64 = 0.55;

fn rule(intent: Intent, pattern: &str, confidence: f64, reason: &'static str) -> IntentRule {
    IntentRule {
        intent,
        pattern: Regex::new(pattern).expect("valid intent pattern"),
        confidence,
        reason,
    }
}

/// Keyword rules between the empty check and the fallback, in precedence order.
pub static INTENT_RULES: Lazy<Vec<IntentRule>> = Lazy::new(|| {
    vec![
        rule(
            Intent::AfterSales,
            r"(售后|退货|退款|换货|保修|维修|质量|坏了|投诉|不适|过敏|泛红|刺痛|搓泥|闷痘|闭口)",
            0.85,
            "after_sales_keyword",
        ),
        rule(
            Intent::BuyIntent,
            r"(怎么买|哪里买|哪买|求链接|蹲链接|链接|上车|购买|下单|到手价|优惠|券|活动|大促|价格|多少钱|有货吗|库存|发货|包邮|尺码|型号|版本|咨询)",
            0.85,
            "buy_keyword",
        ),
        rule(
            Intent::Complaint,
            r"(垃圾|坑|骗子|差评|别买|不好用|翻车|失望|智商税|踩雷)",
            0.8,
            "negative_keyword",
        ),
        rule(
            Intent::Praise,
            r"(好棒|厉害|喜欢|爱了|太强|牛|绝了|学到了|谢谢|好看|好可爱|太美|好美|真香|种草|回购|安排|yyds)",
            0.75,
            "praise_keyword",
        ),
        rule(
            Intent::Question,
            r"(\?|？|怎么|如何|为何|为什么|能不能|可以吗|行吗|有没有|请问|在哪|哪里|怎么用|用法|顺序|叠加|搭配|会闷吗|能用吗|适合吗)",
            0.7,
            "question_pattern",
        ),
    ]
});

pub fn detect_intent(text: &str) -> IntentResult {
    let text = text.trim();
    if text.is_empty() {
        return IntentResult {
            intent: Intent::Empty,
            confidence: EMPTY_CONFIDENCE,
            reasons: vec!["empty_text".to_string()],
        };
    }

    INTENT_RULES
        .iter()
        .find(|r| r.pattern.is_match(text))
        .map(|r| IntentResult {
            intent: r.intent,
            confidence: r.confidence,
            reasons: vec![r.reason.to_string()],
        })
        .unwrap_or_else(|| IntentResult {
            intent: Intent::Chat,
            confidence: FALLBACK_CONFIDENCE,
            reasons: vec!["fallback".to_string()],
        })
}
