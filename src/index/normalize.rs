use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// 查询/索引两侧共用的标点黑名单
const STRIPPED_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '/', '"', '\'', '-'];

/// 文本规范化：小写 -> NFD -> 去变音符号 -> 去标点 -> trim
///
/// trim 必须放在最后，否则 "foo !" 之类的输入二次规范化结果不一致。
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| !STRIPPED_PUNCTUATION.contains(c))
        .collect();
    folded.trim().to_string()
}

/// 已规范化文本按空白切词（连续空白视为一个分隔符）
pub fn words(normalized: &str) -> impl Iterator<Item = &str> {
    normalized.split_whitespace()
}
