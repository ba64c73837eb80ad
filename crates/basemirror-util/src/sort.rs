use std::cmp::Ordering;

/// Insertion sort with a custom comparator.
///
/// Stable. O(n) on already-sorted input, which makes it the right tool for
/// re-establishing an order after a few entries changed.
///
/// # Examples
///
/// ```
/// use basemirror_util::sort::insertion_sort_by;
///
/// let mut arr = vec![3, 1, 4, 1, 5];
/// insertion_sort_by(&mut arr, |a, b| b.cmp(a));
/// assert_eq!(arr, vec![5, 4, 3, 1, 1]);
/// ```
pub fn insertion_sort_by<T, F>(arr: &mut [T], mut compare: F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    for i in 1..arr.len() {
        let mut j = i;
        while j > 0 && compare(&arr[j - 1], &arr[j]) == Ordering::Greater {
            arr.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// Position at which `item` would be inserted into the sorted `arr`.
///
/// Returns the upper bound: the index after every element comparing equal to
/// `item`, so inserting there keeps equal elements in arrival order.
///
/// # Examples
///
/// ```
/// use basemirror_util::sort::sorted_position_by;
///
/// let arr = [1, 2, 2, 5];
/// assert_eq!(sorted_position_by(&arr, &2, |a, b| a.cmp(b)), 3);
/// assert_eq!(sorted_position_by(&arr, &0, |a, b| a.cmp(b)), 0);
/// assert_eq!(sorted_position_by(&arr, &9, |a, b| a.cmp(b)), 4);
/// ```
pub fn sorted_position_by<T, F>(arr: &[T], item: &T, mut compare: F) -> usize
where
    F: FnMut(&T, &T) -> Ordering,
{
    let mut lo = 0;
    let mut hi = arr.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if compare(&arr[mid], item) == Ordering::Greater {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

/// Insert `item` into the sorted `vec`, returning the index it landed at.
///
/// # Examples
///
/// ```
/// use basemirror_util::sort::insert_sorted_by;
///
/// let mut arr = vec![1, 3, 5];
/// let at = insert_sorted_by(&mut arr, 4, |a, b| a.cmp(b));
/// assert_eq!(at, 2);
/// assert_eq!(arr, vec![1, 3, 4, 5]);
/// ```
pub fn insert_sorted_by<T, F>(vec: &mut Vec<T>, item: T, compare: F) -> usize
where
    F: FnMut(&T, &T) -> Ordering,
{
    let at = sorted_position_by(vec, &item, compare);
    vec.insert(at, item);
    at
}

/// `true` when no adjacent pair of `arr` is out of order.
pub fn is_sorted_by<T, F>(arr: &[T], mut compare: F) -> bool
where
    F: FnMut(&T, &T) -> Ordering,
{
    arr.windows(2)
        .all(|pair| compare(&pair[0], &pair[1]) != Ordering::Greater)
}
