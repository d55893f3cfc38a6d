use frame_ring::app::{Key, PAUSED_SLEEP};
use frame_ring::gpu::Device;
use frame_ring::headless::{HeadlessBuffer, HeadlessCommandList, HeadlessDevice};
use frame_ring::{
    FrameOutcome, FrameRing, FrameTime, GpuResult, RunLoop, SampleCommandLine, Scene, UploadRegion,
};
use tracing::{debug, info};

use crate::demo_error::DemoResult;
use crate::scene_data::{
    Geometry, RenderSettings, SettingsChange, ShapesFrame, ShapesWorld, Vertex, WAVE_VERTEX_COUNT,
    create_triangle,
};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

/// The sample scene recorded into the software backend.
pub struct HeadlessShapes {
    ring: FrameRing<HeadlessDevice, ShapesFrame<HeadlessBuffer>>,
    list: HeadlessCommandList,
    triangle: UploadRegion<HeadlessBuffer, Vertex>,
    world: ShapesWorld,
    settings: RenderSettings,
    uploads: usize,
}

impl HeadlessShapes {
    pub fn new(device: &HeadlessDevice, command_line: &SampleCommandLine) -> GpuResult<Self> {
        let world = ShapesWorld::new(frame_ring::DEFAULT_FRAME_COUNT, WIDTH, HEIGHT);
        let object_count = world.object_count();
        let queue = device.create_command_queue()?;
        let ring = FrameRing::new(device, queue, command_line.wait_policy, |device, _| {
            ShapesFrame::new(device, 1, object_count, WAVE_VERTEX_COUNT)
        })?;
        let list = device.create_command_list(ring.current().allocator())?;
        Ok(Self {
            triangle: create_triangle(device)?,
            ring,
            list,
            world,
            settings: RenderSettings::default(),
            uploads: 0,
        })
    }
}

impl Scene for HeadlessShapes {
    fn update(&mut self, time: FrameTime) -> GpuResult<()> {
        self.world.update(time);
        Ok(())
    }

    fn draw(&mut self, _time: FrameTime) -> GpuResult<()> {
        let world = &mut self.world;
        let triangle = &self.triangle;
        let uploads = &mut self.uploads;
        let pipeline = self.settings.pipeline_label();
        self.ring.render_frame(&mut self.list, |frame, list, _| {
            *uploads += world.upload(frame)?;

            list.marker(pipeline)?;
            list.bind_constants(1, frame.constants.pass.resource_handle())?;
            for item in world.items() {
                list.marker(item.name)?;
                list.bind_constants(0, frame.constants.objects.element_address(item.object_index))?;
                let vertices = match item.geometry {
                    Geometry::Triangle => triangle,
                    Geometry::Wave => &frame.vertices,
                };
                list.bind_vertices(
                    vertices.resource_handle(),
                    vertices.stride() as u32,
                    vertices.element_count() as u32,
                )?;
                list.draw(item.vertex_count(), 1)?;
            }
            Ok(())
        })
    }

    fn on_resize(&mut self, width: u32, height: u32) -> GpuResult<()> {
        self.ring.flush()?;
        self.world.set_render_target_size(width, height);
        Ok(())
    }

    fn on_key(&mut self, key: Key) -> GpuResult<()> {
        match self.settings.apply_key(key) {
            Some(SettingsChange::Multisampling) => {
                // Stands in for rebuilding the multisampled targets.
                self.ring.flush()?;
                info!(msaa_4x = self.settings.msaa_4x, "Toggled 4x MSAA");
            }
            Some(SettingsChange::FillMode) => {
                debug!(wireframe = self.settings.wireframe, "Toggled wireframe");
            }
            None => {}
        }
        Ok(())
    }
}

pub fn run(command_line: &SampleCommandLine) -> DemoResult<()> {
    let device = HeadlessDevice::new();
    let scene = HeadlessShapes::new(&device, command_line)?;
    let mut run_loop = RunLoop::new(scene, WIDTH, HEIGHT);
    info!(frames = command_line.frames, "Running headless");

    run_loop.begin();
    let mut rendered = 0;
    while rendered < command_line.frames {
        match run_loop.frame()? {
            FrameOutcome::Rendered { .. } => rendered += 1,
            FrameOutcome::Paused => std::thread::sleep(PAUSED_SLEEP),
        }
    }

    let total_time = run_loop.scene().world.pass().total_time;
    let mut scene = run_loop.into_scene();
    let last_value = scene.ring.flush()?;
    info!(
        rendered,
        submitted = scene.ring.queue().executed_count(),
        object_uploads = scene.uploads,
        last_value,
        total_time,
        live_buffers = device.live_buffers(),
        "Headless run finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_ring::headless::Command;

    #[test]
    fn each_frame_draws_every_item_from_its_own_slot() {
        let device = HeadlessDevice::new();
        let mut scene = HeadlessShapes::new(&device, &SampleCommandLine::default()).unwrap();
        let time = FrameTime {
            delta: 0.016,
            total: 1.0,
        };
        for _ in 0..4 {
            scene.update(time).unwrap();
            scene.draw(time).unwrap();
        }

        let executed = scene.ring.queue().executed();
        assert_eq!(executed.len(), 4);
        let draws = executed[0]
            .commands
            .iter()
            .filter(|command| matches!(command, Command::Draw { .. }))
            .count();
        assert_eq!(draws, scene.world.object_count());

        let wave_address = |slot: usize| {
            scene.ring.slots()[slot]
                .regions()
                .vertices
                .resource_handle()
        };
        let wave_binding = |frame: usize| {
            executed[frame]
                .commands
                .iter()
                .rev()
                .find_map(|command| match command {
                    Command::BindVertices { address, .. } => Some(*address),
                    _ => None,
                })
        };
        assert_eq!(wave_binding(0), Some(wave_address(0)));
        assert_eq!(wave_binding(1), Some(wave_address(1)));
        assert_eq!(wave_binding(3), Some(wave_address(0)));
    }

    #[test]
    fn multisample_toggle_flushes_and_wireframe_does_not() {
        let device = HeadlessDevice::new();
        let mut scene = HeadlessShapes::new(&device, &SampleCommandLine::default()).unwrap();
        let time = FrameTime {
            delta: 0.016,
            total: 1.0,
        };
        scene.draw(time).unwrap();
        scene.draw(time).unwrap();
        assert_eq!(scene.ring.timeline().last_signaled(), 2);

        scene.on_key(Key::Digit(1)).unwrap();
        assert_eq!(scene.ring.timeline().last_signaled(), 2);
        scene.draw(time).unwrap();

        scene.on_key(Key::F2).unwrap();
        let timeline = scene.ring.timeline();
        assert_eq!(timeline.last_signaled(), 4);
        assert_eq!(timeline.completed_value(), 4);
        scene.draw(time).unwrap();

        let pipelines: Vec<_> = scene
            .ring
            .queue()
            .executed()
            .iter()
            .filter_map(|list| match list.commands.first() {
                Some(Command::Marker(label)) => Some(label.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            pipelines,
            vec!["opaque", "opaque", "opaque_wireframe", "opaque_wireframe_msaa"]
        );
    }

    #[test]
    fn headless_run_completes() {
        let command_line = SampleCommandLine {
            headless: true,
            frames: 12,
            ..SampleCommandLine::default()
        };
        run(&command_line).unwrap();
    }
}
