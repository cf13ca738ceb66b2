use super::expr::{MULTI_WILD, SEPARATOR, SINGLE_WILD};

/// Покрывает ли шаблон `pattern` опубликованный ключ `published`.
///
/// Сравнение посегментное и чувствительное к регистру, якорится с обеих
/// сторон: `*` совпадает ровно с одним непустым сегментом, `**` с любым
/// числом сегментов, включая ноль. Функция детерминирована и не имеет
/// побочных эффектов; корректность грамматики не проверяется.
///
/// Алгоритм жадный с откатом к последнему `**` (как у glob со звездой),
/// `O(n * m)` в худшем случае.
pub fn matches(
    published: &str,
    pattern: &str,
) -> bool {
    let key: Vec<&str> = published.split(SEPARATOR).collect();
    let pat: Vec<&str> = pattern.split(SEPARATOR).collect();

    let (mut k, mut p) = (0, 0);
    // (позиция `**` в шаблоне, позиция в ключе, с которой он начал поглощать)
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pat.len() && pat[p] == MULTI_WILD {
            backtrack = Some((p, k));
            p += 1;
        } else if p < pat.len()
            && (pat[p] == key[k] || (pat[p] == SINGLE_WILD && !key[k].is_empty()))
        {
            k += 1;
            p += 1;
        } else if let Some((star_p, star_k)) = backtrack {
            // `**` поглощает ещё один сегмент ключа.
            backtrack = Some((star_p, star_k + 1));
            p = star_p + 1;
            k = star_k + 1;
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == MULTI_WILD {
        p += 1;
    }
    p == pat.len()
}
