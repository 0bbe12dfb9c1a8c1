//! 测验判分
//!
//! OX：{"O","0","TRUE"} 视为真，{"X","FALSE"} 视为假；
//! 客观题：只保留数字、减一后与正确下标比较，非数字输入直接判错；
//! 简答：去空白并转小写后完全相等，或一方为另一方子串且 短/长 ≥ 0.8（按字符计）。

use crate::memory::{QuizAnswer, QuizRecord};

/// 简答题模糊匹配阈值
pub const SHORT_ANSWER_RATIO: f64 = 0.8;

const GIVEUP_PHRASES: [&str; 8] = [
    "모르겠", "몰라", "포기", "패스", "정답 알려", "답 알려", "giveup", "give up",
];

/// 去掉所有空白并转小写
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// 单个数字或 O/X（大小写不敏感），与 `^\s*([0-9]|O|X)\s*$` 等价
pub fn is_bare_token(text: &str) -> bool {
    let t = text.trim();
    let mut chars = t.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.is_ascii_digit() || matches!(c, 'o' | 'O' | 'x' | 'X'),
        _ => false,
    }
}

/// 放弃作答的说法
pub fn is_giveup(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    GIVEUP_PHRASES.iter().any(|p| lower.contains(p))
}

pub fn grade_ox(user: &str, correct: bool) -> bool {
    let norm = normalize(user).to_uppercase();
    match norm.as_str() {
        "O" | "0" | "TRUE" => correct,
        "X" | "FALSE" => !correct,
        _ => false,
    }
}

pub fn grade_multiple_choice(user: &str, correct_index: usize) -> bool {
    let digits: String = user.chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .map(|idx| idx == correct_index)
        .unwrap_or(false)
}

pub fn check_short_answer(user: &str, accepted: &[String]) -> bool {
    let user_norm = normalize(user);
    if user_norm.is_empty() {
        return false;
    }
    let user_len = user_norm.chars().count();

    accepted.iter().any(|answer| {
        let answer_norm = normalize(answer);
        if answer_norm.is_empty() {
            return false;
        }
        if user_norm == answer_norm {
            return true;
        }
        let answer_len = answer_norm.chars().count();
        let (longer, shorter, longer_len, shorter_len) = if user_len > answer_len {
            (&user_norm, &answer_norm, user_len, answer_len)
        } else {
            (&answer_norm, &user_norm, answer_len, user_len)
        };
        longer.contains(shorter.as_str())
            && (shorter_len as f64 / longer_len as f64) >= SHORT_ANSWER_RATIO
    })
}

/// 按题型判分；无法解析的作答一律判错
pub fn grade(quiz: &QuizRecord, user: &str) -> bool {
    match &quiz.answer {
        QuizAnswer::Ox { correct } => grade_ox(user, *correct),
        QuizAnswer::MultipleChoice { correct_index, .. } => grade_multiple_choice(user, *correct_index),
        QuizAnswer::ShortAnswer { accepted } => check_short_answer(user, accepted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_short_answer_threshold() {
        let a = accepted(&["배당금"]);
        assert!(check_short_answer("배당금", &a));
        assert!(check_short_answer(" 배 당 금 ", &a));
        assert!(!check_short_answer("당금", &a));
        assert!(!check_short_answer("배당금이요", &a));
        assert!(!check_short_answer("", &a));
    }

    #[test]
    fn test_short_answer_boundary_is_inclusive() {
        // 4/5 = 0.8
        assert!(check_short_answer("abcd", &accepted(&["abcde"])));
        assert!(check_short_answer("Supply Chain", &accepted(&["환율 변동", "supplychain"])));
    }

    #[test]
    fn test_ox_equivalents() {
        assert!(grade_ox("o", true));
        assert!(grade_ox(" 0 ", true));
        assert!(grade_ox("true", true));
        assert!(grade_ox("x", false));
        assert!(grade_ox("False", false));
        assert!(!grade_ox("O", false));
        assert!(!grade_ox("맞아요", true));
    }

    #[test]
    fn test_multiple_choice_parsing() {
        assert!(grade_multiple_choice("3번", 2));
        assert!(grade_multiple_choice(" 3 ", 2));
        assert!(!grade_multiple_choice("세번째", 2));
        assert!(!grade_multiple_choice("0", 0));
        assert!(!grade_multiple_choice("99999999999999999999999", 0));
    }

    #[test]
    fn test_tokens_and_giveup() {
        assert!(is_bare_token(" 1 "));
        assert!(is_bare_token("x"));
        assert!(!is_bare_token("12"));
        assert!(!is_bare_token("정답"));
        assert!(is_giveup("모르겠어"));
        assert!(is_giveup("정답 알려줘"));
        assert!(!is_giveup("배당금"));
    }
}
