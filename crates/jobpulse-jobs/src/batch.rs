/// Splits `items` into contiguous groups of `size`; only the last group may
/// be shorter. A `size` of zero is treated as one.
pub fn chunk<T>(items: &[T], size: usize) -> Vec<&[T]> {
    items.chunks(size.max(1)).collect()
}

#[cfg(test)]
mod tests {
    use super::chunk;

    #[test]
    fn twelve_items_in_fives() {
        let items = (1..=12).collect::<Vec<_>>();
        let groups = chunk(&items, 5);

        assert_eq!(groups.iter().map(|g| g.len()).collect::<Vec<_>>(), vec![5, 5, 2]);
        assert_eq!(groups.concat(), items);
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let items = (0..10).collect::<Vec<_>>();
        assert_eq!(chunk(&items, 5).len(), 2);
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(chunk::<u8>(&[], 5).is_empty());
    }

    #[test]
    fn zero_size_degrades_to_singletons() {
        assert_eq!(chunk(&[1, 2, 3], 0), vec![&[1][..], &[2][..], &[3][..]]);
    }
}
