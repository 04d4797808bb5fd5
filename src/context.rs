use std::sync::Arc;

mod vk {
	pub(super) use vulkano::command_buffer::allocator::{
		StandardCommandBufferAllocator, StandardCommandBufferAllocatorCreateInfo,
	};
	pub(super) use vulkano::descriptor_set::allocator::StandardDescriptorSetAllocator;
	pub(super) use vulkano::device::{Device, DeviceCreateInfo, Queue, QueueCreateInfo, QueueFlags};
	pub(super) use vulkano::instance::{Instance, InstanceCreateFlags, InstanceCreateInfo};
	pub(super) use vulkano::library::VulkanLibrary as Library;
	pub(super) use vulkano::memory::allocator::StandardMemoryAllocator;
	pub(super) use vulkano::{LoadingError, Validated, VulkanError as Error};
}

/// The device, queue, and allocators that reductions are dispatched through,
/// along with the work-group width used to partition them.
pub struct ReduceContext {
	pub(crate) device: Arc<vk::Device>,
	pub(crate) queue: Arc<vk::Queue>,
	pub(crate) memory_allocator: Arc<vk::StandardMemoryAllocator>,
	pub(crate) descriptor_set_allocator: Arc<vk::StandardDescriptorSetAllocator>,
	pub(crate) command_buffer_allocator: Arc<vk::StandardCommandBufferAllocator>,
	work_group_size: u32,
}

/// The error type that can be returned by [`ReduceContext`]’s methods.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("No physical device is available")]
	NoPhysicalDevice,
	#[error("The physical device has no compute queue family")]
	NoComputeQueue,
	#[error("The device does not support work group size {0}")]
	UnsupportedWorkGroupSize(u32),
	#[error(transparent)]
	Loading(#[from] vk::LoadingError),
	#[error(transparent)]
	Vulkan(#[from] vk::Error),
}

impl ReduceContext {
	/// Constructs a new instance of [`ReduceContext`] on the first physical
	/// device exposing a compute queue family.
	pub fn new() -> Result<Self, Error> {
		let library = vk::Library::new()?;
		let instance = vk::Instance::new(
			library,
			vk::InstanceCreateInfo {
				flags: vk::InstanceCreateFlags::ENUMERATE_PORTABILITY,
				..Default::default()
			},
		)
		.map_err(vk::Validated::unwrap)?;

		let physical_device = instance
			.enumerate_physical_devices()?
			.next()
			.ok_or(Error::NoPhysicalDevice)?;
		let queue_family_index = physical_device
			.queue_family_properties()
			.iter()
			.position(|queue_family_properties| {
				queue_family_properties
					.queue_flags
					.contains(vk::QueueFlags::COMPUTE)
			})
			.ok_or(Error::NoComputeQueue)? as u32;

		let (device, mut queues) = vk::Device::new(
			physical_device,
			vk::DeviceCreateInfo {
				queue_create_infos: vec![vk::QueueCreateInfo {
					queue_family_index,
					..Default::default()
				}],
				..Default::default()
			},
		)
		.map_err(vk::Validated::unwrap)?;
		let queue = queues.next().ok_or(Error::NoComputeQueue)?;

		Self::for_device(device, queue)
	}

	/// Constructs a new instance of [`ReduceContext`] over an existing device
	/// and compute queue.
	pub fn for_device(device: Arc<vk::Device>, queue: Arc<vk::Queue>) -> Result<Self, Error> {
		let memory_allocator = Arc::new(vk::StandardMemoryAllocator::new_default(device.clone()));
		let descriptor_set_allocator = Arc::new(vk::StandardDescriptorSetAllocator::new(
			device.clone(),
			Default::default(),
		));
		let command_buffer_allocator = Arc::new(vk::StandardCommandBufferAllocator::new(
			device.clone(),
			vk::StandardCommandBufferAllocatorCreateInfo::default(),
		));

		let work_group_size = device
			.physical_device()
			.properties()
			.max_compute_work_group_size[0];

		Ok(Self {
			device,
			queue,
			memory_allocator,
			descriptor_set_allocator,
			command_buffer_allocator,
			work_group_size,
		})
	}

	/// Overrides the work-group width that reductions partition their input
	/// by, which defaults to the device’s maximum.
	///
	/// Widths below 2 cannot shrink the number of partial results between
	/// rounds and are rejected, as are widths beyond the device’s maximum.
	pub fn with_work_group_size(mut self, work_group_size: u32) -> Result<Self, Error> {
		let max = self
			.device
			.physical_device()
			.properties()
			.max_compute_work_group_size[0];
		if work_group_size < 2 || work_group_size > max {
			return Err(Error::UnsupportedWorkGroupSize(work_group_size));
		}
		self.work_group_size = work_group_size;
		Ok(self)
	}

	/// Returns the work-group width that reductions partition their input by.
	pub fn work_group_size(&self) -> u32 {
		self.work_group_size
	}

	/// Returns the device this context dispatches to.
	pub fn device(&self) -> &Arc<vk::Device> {
		&self.device
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bring_up() {
		let context = ReduceContext::new().unwrap();
		assert!(context.work_group_size() >= 128);
	}

	#[test]
	fn work_group_size_bounds() {
		let context = ReduceContext::new().unwrap();
		let max = context
			.device()
			.physical_device()
			.properties()
			.max_compute_work_group_size[0];

		assert!(matches!(
			ReduceContext::new().unwrap().with_work_group_size(0),
			Err(Error::UnsupportedWorkGroupSize(0))
		));
		assert!(matches!(
			ReduceContext::new().unwrap().with_work_group_size(1),
			Err(Error::UnsupportedWorkGroupSize(1))
		));
		assert!(matches!(
			ReduceContext::new().unwrap().with_work_group_size(max + 1),
			Err(Error::UnsupportedWorkGroupSize(_))
		));

		assert_eq!(
			context.with_work_group_size(64).unwrap().work_group_size(),
			64
		);
	}
}
