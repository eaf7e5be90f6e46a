//! Distribution of simulated users across user classes.

use crate::user_class::UserClass;

/// Number of users to run for each class, in class order.
///
/// Classes with a fixed count are served first, in order, until the total is
/// used up. The remaining users are split across the weighted classes with
/// the largest-remainder method. When there are at least as many remaining
/// users as weighted classes, every weighted class gets at least one.
pub fn distribute_users(total: usize, classes: &[UserClass]) -> Vec<usize> {
    let mut counts = vec![0usize; classes.len()];
    let mut remaining = total;

    for (i, class) in classes.iter().enumerate() {
        if let Some(fixed) = class.fixed_count {
            let assigned = fixed.min(remaining);
            counts[i] = assigned;
            remaining -= assigned;
        }
    }

    let weighted: Vec<usize> = classes
        .iter()
        .enumerate()
        .filter(|(_, class)| class.fixed_count.is_none() && class.weight > 0)
        .map(|(i, _)| i)
        .collect();

    if weighted.is_empty() || remaining == 0 {
        return counts;
    }

    if remaining >= weighted.len() {
        for &i in &weighted {
            counts[i] += 1;
        }
        remaining -= weighted.len();
    }

    let total_weight: u64 = weighted.iter().map(|&i| classes[i].weight as u64).sum();
    let mut remainders = Vec::with_capacity(weighted.len());
    let mut assigned = 0usize;

    for &i in &weighted {
        let share = remaining as u64 * classes[i].weight as u64;
        let whole = (share / total_weight) as usize;
        counts[i] += whole;
        assigned += whole;
        remainders.push((share % total_weight, i));
    }

    // Largest fractional part first, earlier classes win ties
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, i) in remainders.into_iter().take(remaining - assigned) {
        counts[i] += 1;
    }

    counts
}

/// Order in which users are spawned, as class indices.
///
/// Uses smooth weighted round robin so classes are interleaved during the
/// ramp-up instead of spawned one class after another. Class `i` appears
/// exactly `counts[i]` times.
pub fn spawn_order(counts: &[usize]) -> Vec<usize> {
    let total: usize = counts.iter().sum();
    let mut current = vec![0i64; counts.len()];
    let mut order = Vec::with_capacity(total);

    for _ in 0..total {
        for (value, &count) in current.iter_mut().zip(counts) {
            *value += count as i64;
        }

        let mut pick = 0;
        for i in 1..current.len() {
            if current[i] > current[pick] {
                pick = i;
            }
        }

        current[pick] -= total as i64;
        order.push(pick);
    }

    order
}
