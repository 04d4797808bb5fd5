/// Sizing arithmetic for multi-round reductions over work groups.
pub(crate) trait RoundSizing {
	/// Size in bytes of one partial result.
	const PARTIAL_STRIDE: u64;

	/// Returns the size of a work group.
	fn work_group_size(&self) -> u64;

	/// Returns the alignment for storage-buffer offsets.
	fn buffer_offset_alignment(&self) -> u64;

	/// Returns the number of work groups dispatched for one round over the
	/// given number of values.
	fn num_work_groups(&self, vals_len: u64) -> u64 {
		(vals_len - 1) / self.work_group_size() + 1
	}

	/// Returns the offset into the partials buffer at which the round
	/// following one of the given number of work groups starts writing.
	fn round_split(&self, num_work_groups: u64) -> u64 {
		let align = self.buffer_offset_alignment();
		round_split(num_work_groups, Self::PARTIAL_STRIDE, align)
	}

	/// Returns the total length of the partials buffer covering every round
	/// for the given number of values.
	fn reduce_buffer_len(&self, mut vals_len: u64) -> u64 {
		let align = self.buffer_offset_alignment();
		let mut next_split = 0;
		let mut min_len = 0;
		while vals_len > 1 {
			min_len += next_split;
			let num_work_groups = self.num_work_groups(vals_len);
			next_split = round_split(num_work_groups, Self::PARTIAL_STRIDE, align);
			vals_len = num_work_groups;
		}
		min_len + 1
	}
}

fn round_split(len: u64, stride: u64, align: u64) -> u64 {
	((len * stride - 1) / align + 1) * align / stride
}
