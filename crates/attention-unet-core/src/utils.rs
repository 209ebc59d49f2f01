//! Small helpers shared by the block crates

/// Returns true if every item equals the first one (true for no items)
pub fn all_equal<I>(items: I) -> bool
where
    I: IntoIterator,
    I::Item: PartialEq,
{
    let mut items = items.into_iter();
    match items.next() {
        Some(first) => items.all(|item| item == first),
        None => true,
    }
}
