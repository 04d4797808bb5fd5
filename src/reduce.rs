use std::sync::Arc;

mod vk {
	pub(super) use vulkano::buffer::{
		AllocateBufferError, Buffer, BufferCreateInfo, BufferUsage, Subbuffer,
	};
	pub(super) use vulkano::command_buffer::{
		AutoCommandBufferBuilder, CommandBufferExecError, CommandBufferUsage,
	};
	pub(super) use vulkano::descriptor_set::{
		DescriptorSet, WriteDescriptorSet, allocator::DescriptorSetAllocator,
	};
	pub(super) use vulkano::memory::allocator::{AllocationCreateInfo, MemoryTypeFilter};
	pub(super) use vulkano::pipeline::{
		ComputePipeline, PipelineBindPoint, PipelineLayout, PipelineShaderStageCreateInfo,
		compute::ComputePipelineCreateInfo, layout::PipelineDescriptorSetLayoutCreateInfo,
	};
	pub(super) use vulkano::shader::SpecializationConstant;
	pub(super) use vulkano::sync::HostAccessError;
	pub(super) use vulkano::{Validated, VulkanError as Error};
}
use vulkano::{device::DeviceOwned as _, pipeline::Pipeline as _};

use crate::{context::ReduceContext, util::RoundSizing};

/// The per-element transform applied while gathering input values during the
/// first round of a reduction. Later rounds re-combine already-transformed
/// partial results verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transform {
	/// Feeds values into the combine unchanged.
	Identity,
	/// Feeds 1 into the combine where the predicate holds, and 0 elsewhere.
	Predicate(Predicate),
}

/// A unary predicate on 32-bit unsigned integers, evaluated on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Predicate {
	IsEven,
	IsOdd,
	NonZero,
	LessThan(u32),
	GreaterThan(u32),
	EqualTo(u32),
}

/// An associative binary operator folding two partial results into one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Combine {
	Add,
	Min,
	Max,
	BitAnd,
	BitOr,
}

impl Transform {
	fn op_code(self) -> u32 {
		match self {
			Self::Identity => 0,
			Self::Predicate(Predicate::IsEven) => 1,
			Self::Predicate(Predicate::IsOdd) => 2,
			Self::Predicate(Predicate::NonZero) => 3,
			Self::Predicate(Predicate::LessThan(_)) => 4,
			Self::Predicate(Predicate::GreaterThan(_)) => 5,
			Self::Predicate(Predicate::EqualTo(_)) => 6,
		}
	}

	/// The comparison operand, passed along with the per-round state so one
	/// pipeline serves any operand value.
	fn operand(self) -> u32 {
		match self {
			Self::Predicate(
				Predicate::LessThan(operand)
				| Predicate::GreaterThan(operand)
				| Predicate::EqualTo(operand),
			) => operand,
			_ => 0,
		}
	}
}

impl Combine {
	fn op_code(self) -> u32 {
		match self {
			Self::Add => 0,
			Self::Min => 1,
			Self::Max => 2,
			Self::BitAnd => 3,
			Self::BitOr => 4,
		}
	}
}

/// A compute kernel that reduces an array of 32-bit unsigned integers to a
/// single value, transforming each once and folding the results with an
/// associative combine over one or more rounds of work-group dispatches.
pub struct Reduce {
	descriptor_set_allocator: Arc<dyn vk::DescriptorSetAllocator>,
	pipeline: Arc<vk::ComputePipeline>,
	work_group_size: u32,
	transform_operand: u32,
}

/// The error type that can be returned by [`Reduce`]’s methods.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("The values buffer is empty")]
	ValsEmpty,
	#[error("The partials buffer has invalid length")]
	InvalidPartialsLength,
	#[error("Failed to allocate a device buffer")]
	Allocate(#[from] vk::AllocateBufferError),
	#[error("Failed to execute the recorded reduction")]
	Exec(#[from] vk::CommandBufferExecError),
	#[error("Failed to read back the reduction result")]
	HostAccess(#[from] vk::HostAccessError),
	#[error(transparent)]
	Vulkan(#[from] vk::Error),
}

impl Reduce {
	/// Constructs a new instance of [`Reduce`], specializing the kernel with
	/// the context’s work-group width and the given operators.
	pub fn new(
		context: &ReduceContext,
		transform: Transform,
		combine: Combine,
	) -> Result<Self, Error> {
		let device = &context.device;

		mod shader {
			vulkano_shaders::shader! {
				ty: "compute",
				path: "src/shaders/reduce.comp",
				vulkan_version: "1.3",
				spirv_version: "1.3",
			}
		}

		let work_group_size = context.work_group_size();

		let shader = shader::load(device.clone()).map_err(vk::Validated::unwrap)?;
		let specialized_shader = shader
			.specialize({
				use foldhash::HashMapExt as _;
				let mut constants = foldhash::HashMap::new();
				constants.insert(0, vk::SpecializationConstant::U32(work_group_size));
				constants.insert(1, vk::SpecializationConstant::U32(transform.op_code()));
				constants.insert(2, vk::SpecializationConstant::U32(combine.op_code()));
				constants
			})
			.unwrap();
		let entry_point = specialized_shader.entry_point("main").unwrap();

		let stage = vk::PipelineShaderStageCreateInfo::new(entry_point);
		let layout = vk::PipelineLayout::new(
			device.clone(),
			vk::PipelineDescriptorSetLayoutCreateInfo::from_stages([&stage])
				.into_pipeline_layout_create_info(device.clone())
				.map_err(|e| e.error.unwrap())?,
		)
		.map_err(vk::Validated::unwrap)?;

		let pipeline = vk::ComputePipeline::new(
			device.clone(),
			None,
			vk::ComputePipelineCreateInfo::stage_layout(stage, layout),
		)
		.map_err(vk::Validated::unwrap)?;

		Ok(Self {
			descriptor_set_allocator: context.descriptor_set_allocator.clone(),
			pipeline,
			work_group_size,
			transform_operand: transform.operand(),
		})
	}

	/// Returns the required length of this kernel’s partials buffer for the
	/// given input values length.
	pub fn partials_buffer_len(&self, vals_len: u64) -> u64 {
		self.reduce_buffer_len(vals_len)
	}

	/// Records the reduction kernel(s) onto the given command buffer (one
	/// dispatch per round, until a single work group covers what remains).
	///
	/// Returns the offset in `partials_buffer` where the final result can be
	/// found after execution.
	pub fn record<L>(
		&self,
		command_buffer_builder: &mut vk::AutoCommandBufferBuilder<L>,
		vals_buffer: vk::Subbuffer<[u32]>,
		partials_buffer: vk::Subbuffer<[u32]>,
	) -> Result<u64, Error> {
		assert_eq!(
			command_buffer_builder.device(),
			self.descriptor_set_allocator.device()
		);

		if vals_buffer.len() == 0 {
			return Err(Error::ValsEmpty);
		}

		if partials_buffer.len() < self.partials_buffer_len(vals_buffer.len()) {
			return Err(Error::InvalidPartialsLength);
		}

		command_buffer_builder
			.bind_pipeline_compute(self.pipeline.clone())
			.unwrap();

		self.record_inner(command_buffer_builder, vals_buffer, partials_buffer, 0)
	}

	fn record_inner<L>(
		&self,
		command_buffer_builder: &mut vk::AutoCommandBufferBuilder<L>,
		vals_buffer: vk::Subbuffer<[u32]>,
		partials_buffer: vk::Subbuffer<[u32]>,
		pass_index: u32,
	) -> Result<u64, Error> {
		let remaining_len = vals_buffer.len();
		let num_work_groups = self.num_work_groups(remaining_len);

		let descriptor_set = vk::DescriptorSet::new(
			self.descriptor_set_allocator.clone(),
			self.pipeline.layout().set_layouts()[0].clone(),
			[
				vk::WriteDescriptorSet::buffer(0, vals_buffer),
				vk::WriteDescriptorSet::buffer(
					1,
					partials_buffer.clone().slice(..num_work_groups),
				),
			],
			[],
		)
		.map_err(vk::Validated::unwrap)?;

		command_buffer_builder
			.bind_descriptor_sets(
				vk::PipelineBindPoint::Compute,
				self.pipeline.layout().clone(),
				0,
				descriptor_set,
			)
			.unwrap()
			.push_constants(
				self.pipeline.layout().clone(),
				0,
				[remaining_len as u32, pass_index, self.transform_operand],
			)
			.unwrap();
		unsafe { command_buffer_builder.dispatch([num_work_groups as u32, 1, 1]) }.unwrap();

		if num_work_groups == 1 {
			return Ok(0);
		}

		let split = self.round_split(num_work_groups);
		let (next_vals_buffer, next_partials_buffer) = partials_buffer.split_at(split);

		Ok(split
			+ self.record_inner(
				command_buffer_builder,
				next_vals_buffer.slice(..num_work_groups),
				next_partials_buffer,
				pass_index + 1,
			)?)
	}

	/// Stages `vals` onto the context’s device, records every round, submits,
	/// and blocks until the result can be read back.
	pub fn execute(&self, context: &ReduceContext, vals: &[u32]) -> Result<u32, Error> {
		use vulkano::{command_buffer::PrimaryCommandBufferAbstract as _, sync::GpuFuture as _};

		if vals.is_empty() {
			return Err(Error::ValsEmpty);
		}

		let vals_buffer = vk::Buffer::from_iter::<u32, _>(
			context.memory_allocator.clone(),
			vk::BufferCreateInfo {
				usage: vk::BufferUsage::STORAGE_BUFFER,
				..Default::default()
			},
			vk::AllocationCreateInfo {
				memory_type_filter: vk::MemoryTypeFilter::PREFER_DEVICE
					| vk::MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
				..Default::default()
			},
			vals.iter().copied(),
		)
		.map_err(vk::Validated::unwrap)?;

		let partials_buffer = vk::Buffer::new_slice::<u32>(
			context.memory_allocator.clone(),
			vk::BufferCreateInfo {
				usage: vk::BufferUsage::STORAGE_BUFFER,
				..Default::default()
			},
			vk::AllocationCreateInfo {
				memory_type_filter: vk::MemoryTypeFilter::PREFER_DEVICE
					| vk::MemoryTypeFilter::HOST_RANDOM_ACCESS,
				..Default::default()
			},
			self.partials_buffer_len(vals.len() as u64),
		)
		.map_err(vk::Validated::unwrap)?;

		let mut command_buffer_builder = vk::AutoCommandBufferBuilder::primary(
			context.command_buffer_allocator.clone(),
			context.queue.queue_family_index(),
			vk::CommandBufferUsage::OneTimeSubmit,
		)
		.map_err(vk::Validated::unwrap)?;

		let result_offset =
			self.record(&mut command_buffer_builder, vals_buffer, partials_buffer.clone())?;
		debug_assert_eq!(result_offset + 1, self.partials_buffer_len(vals.len() as u64));

		command_buffer_builder
			.build()
			.map_err(vk::Validated::unwrap)?
			.execute(context.queue.clone())?
			.then_signal_fence_and_flush()
			.map_err(vk::Validated::unwrap)?
			.wait(None)
			.map_err(vk::Validated::unwrap)?;

		let partials = partials_buffer.read()?;
		Ok(partials[result_offset as usize])
	}
}

impl RoundSizing for Reduce {
	const PARTIAL_STRIDE: u64 = 4;

	fn work_group_size(&self) -> u64 {
		self.work_group_size as u64
	}

	fn buffer_offset_alignment(&self) -> u64 {
		self.pipeline
			.device()
			.physical_device()
			.properties()
			.min_storage_buffer_offset_alignment
			.as_devicesize()
	}
}

#[cfg(test)]
mod ones {
	use super::*;

	fn ones(num: usize, work_group_size: Option<u32>) -> u32 {
		let mut context = ReduceContext::new().unwrap();
		if let Some(work_group_size) = work_group_size {
			context = context.with_work_group_size(work_group_size).unwrap();
		}

		Reduce::new(&context, Transform::Identity, Combine::Add)
			.unwrap()
			.execute(&context, &vec![1; num])
			.unwrap()
	}

	#[test]
	fn single() {
		assert_eq!(ones(1, None), 1);
	}

	#[test]
	fn small() {
		assert_eq!(ones(1024, None), 1024);
	}

	#[test]
	fn narrow_groups() {
		assert_eq!(ones(1000, Some(2)), 1000);
	}

	#[test]
	fn medium() {
		assert_eq!(ones(33793, None), 33793);
	}

	#[test]
	fn large() {
		assert_eq!(ones(1048577, None), 1048577);
	}
}


#[cfg(test)]
mod other_ops {
	use super::*;

	fn reduced(vals: &[u32], transform: Transform, combine: Combine) -> u32 {
		let context = ReduceContext::new()
			.unwrap()
			.with_work_group_size(7)
			.unwrap();

		Reduce::new(&context, transform, combine)
			.unwrap()
			.execute(&context, vals)
			.unwrap()
	}

	#[test]
	fn max() {
		let vals: Vec<u32> = (0..1000).map(|i| i * 7919 % 1000 + 13).collect();
		assert_eq!(
			reduced(&vals, Transform::Identity, Combine::Max),
			*vals.iter().max().unwrap(),
		);
	}

	#[test]
	fn min() {
		let vals: Vec<u32> = (0..1000).map(|i| i * 7919 % 1000 + 13).collect();
		assert_eq!(
			reduced(&vals, Transform::Identity, Combine::Min),
			*vals.iter().min().unwrap(),
		);
	}

	#[test]
	fn any() {
		let mut vals = vec![0; 500];
		assert_eq!(
			reduced(&vals, Transform::Predicate(Predicate::NonZero), Combine::BitOr),
			0,
		);

		vals[321] = 17;
		assert_eq!(
			reduced(&vals, Transform::Predicate(Predicate::NonZero), Combine::BitOr),
			1,
		);
	}

	#[test]
	fn all() {
		let mut vals = vec![9; 500];
		assert_eq!(
			reduced(&vals, Transform::Predicate(Predicate::NonZero), Combine::BitAnd),
			1,
		);

		vals[321] = 0;
		assert_eq!(
			reduced(&vals, Transform::Predicate(Predicate::NonZero), Combine::BitAnd),
			0,
		);
	}
}

#[cfg(test)]
mod errors {
	mod vk {
		pub(super) use super::super::vk::*;
	}

	use super::*;

	#[test]
	fn empty_vals() {
		let context = ReduceContext::new().unwrap();
		let reduce = Reduce::new(&context, Transform::Identity, Combine::Add).unwrap();

		assert!(matches!(
			reduce.execute(&context, &[]),
			Err(Error::ValsEmpty)
		));
	}

	#[test]
	fn short_partials() {
		let context = ReduceContext::new()
			.unwrap()
			.with_work_group_size(4)
			.unwrap();
		let reduce = Reduce::new(&context, Transform::Identity, Combine::Add).unwrap();

		let vals_buffer = vk::Buffer::from_iter::<u32, _>(
			context.memory_allocator.clone(),
			vk::BufferCreateInfo {
				usage: vk::BufferUsage::STORAGE_BUFFER,
				..Default::default()
			},
			vk::AllocationCreateInfo {
				memory_type_filter: vk::MemoryTypeFilter::PREFER_DEVICE
					| vk::MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
				..Default::default()
			},
			0..100,
		)
		.unwrap();

		let partials_buffer = vk::Buffer::new_slice::<u32>(
			context.memory_allocator.clone(),
			vk::BufferCreateInfo {
				usage: vk::BufferUsage::STORAGE_BUFFER,
				..Default::default()
			},
			vk::AllocationCreateInfo {
				memory_type_filter: vk::MemoryTypeFilter::PREFER_DEVICE,
				..Default::default()
			},
			1,
		)
		.unwrap();

		let mut command_buffer_builder = vk::AutoCommandBufferBuilder::primary(
			context.command_buffer_allocator.clone(),
			context.queue.queue_family_index(),
			vk::CommandBufferUsage::OneTimeSubmit,
		)
		.unwrap();

		assert!(matches!(
			reduce.record(&mut command_buffer_builder, vals_buffer, partials_buffer),
			Err(Error::InvalidPartialsLength)
		));
	}
}
