use crate::{
	context::ReduceContext,
	reduce::{Combine, Error, Predicate, Reduce, Transform},
};

/// Returns the number of values in `vals` for which `predicate` holds,
/// computed as a parallel reduction on the context’s device.
///
/// An empty `vals` returns 0 without dispatching any work.
pub fn count_if(
	context: &ReduceContext,
	vals: &[u32],
	predicate: Predicate,
) -> Result<u64, Error> {
	if vals.is_empty() {
		return Ok(0);
	}

	let reduce = Reduce::new(context, Transform::Predicate(predicate), Combine::Add)?;
	Ok(u64::from(reduce.execute(context, vals)?))
}
