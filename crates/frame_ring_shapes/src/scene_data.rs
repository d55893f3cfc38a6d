use bevy_math::{Mat4, Quat, Vec3};
use frame_ring::app::Key;
use frame_ring::gpu::UploadBuffer;
use frame_ring::{DirtyFrames, FrameTime, GpuResult, StreamedFrame, UploadRegion};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectConstants {
    pub world: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PassConstants {
    pub view_proj: [[f32; 4]; 4],
    pub render_target_size: [f32; 2],
    pub total_time: f32,
    pub delta_time: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

/// Everything one frame slot of this sample owns.
pub type ShapesFrame<B> = StreamedFrame<B, PassConstants, ObjectConstants, Vertex>;

pub const WAVE_COLUMNS: usize = 48;
/// Two rows of vertices drawn as one triangle strip.
pub const WAVE_VERTEX_COUNT: usize = WAVE_COLUMNS * 2;

pub const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, 0.5, 0.0],
        color: [1.0, 0.0, 0.0, 1.0],
    },
    Vertex {
        position: [0.5, -0.5, 0.0],
        color: [0.0, 1.0, 0.0, 1.0],
    },
    Vertex {
        position: [-0.5, -0.5, 0.0],
        color: [0.0, 0.0, 1.0, 1.0],
    },
];

/// Uploads [`TRIANGLE`] once. The region is never rewritten, so one copy is
/// shared by every frame slot.
pub fn create_triangle<D>(device: &D) -> GpuResult<UploadRegion<D::Buffer, Vertex>>
where
    D: frame_ring::gpu::Device,
{
    let mut region = UploadRegion::new(device, TRIANGLE.len(), false)?;
    region.copy_slice(&TRIANGLE)?;
    Ok(region)
}

/// F2 toggles 4x multisampling.
pub const MULTISAMPLE_KEY: Key = Key::F2;
/// `1` toggles wireframe rendering.
pub const WIREFRAME_KEY: Key = Key::Digit(1);

/// What a settings key changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsChange {
    /// Render targets change shape; the ring must be flushed first.
    Multisampling,
    /// Only the pipeline state picked at record time changes.
    FillMode,
}

/// Presentation settings the user can toggle while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderSettings {
    pub msaa_4x: bool,
    pub wireframe: bool,
}

impl RenderSettings {
    pub fn apply_key(&mut self, key: Key) -> Option<SettingsChange> {
        match key {
            MULTISAMPLE_KEY => {
                self.msaa_4x = !self.msaa_4x;
                Some(SettingsChange::Multisampling)
            }
            WIREFRAME_KEY => {
                self.wireframe = !self.wireframe;
                Some(SettingsChange::FillMode)
            }
            _ => None,
        }
    }

    pub fn sample_count(&self) -> u32 {
        if self.msaa_4x { 4 } else { 1 }
    }

    /// Name of the pipeline state these settings draw with.
    pub fn pipeline_label(&self) -> &'static str {
        match (self.msaa_4x, self.wireframe) {
            (false, false) => "opaque",
            (false, true) => "opaque_wireframe",
            (true, false) => "opaque_msaa",
            (true, true) => "opaque_wireframe_msaa",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    Triangle,
    Wave,
}

#[derive(Debug)]
pub struct RenderItem {
    pub name: &'static str,
    pub geometry: Geometry,
    pub object_index: usize,
    translation: Vec3,
    scale: f32,
    /// Radians per second around the vertical axis; zero for static items.
    spin: f32,
    world: Mat4,
    dirty: DirtyFrames,
}

impl RenderItem {
    fn new(
        name: &'static str,
        geometry: Geometry,
        object_index: usize,
        translation: Vec3,
        scale: f32,
        spin: f32,
        frame_count: usize,
    ) -> Self {
        Self {
            name,
            geometry,
            object_index,
            translation,
            scale,
            spin,
            world: Mat4::from_scale_rotation_translation(
                Vec3::splat(scale),
                Quat::IDENTITY,
                translation,
            ),
            dirty: DirtyFrames::new(frame_count),
        }
    }

    pub fn vertex_count(&self) -> u32 {
        match self.geometry {
            Geometry::Triangle => TRIANGLE.len() as u32,
            Geometry::Wave => WAVE_VERTEX_COUNT as u32,
        }
    }
}

/// The CPU side of the sample: items, camera and the animated wave strip.
/// Backends only decide how the uploaded data is drawn.
pub struct ShapesWorld {
    items: Vec<RenderItem>,
    pass: PassConstants,
    wave: Vec<Vertex>,
    aspect_ratio: f32,
    eye: Vec3,
}

impl ShapesWorld {
    pub fn new(frame_count: usize, width: u32, height: u32) -> Self {
        let items = vec![
            RenderItem::new(
                "left",
                Geometry::Triangle,
                0,
                Vec3::new(-2.0, 0.5, 0.0),
                1.0,
                0.0,
                frame_count,
            ),
            RenderItem::new(
                "right",
                Geometry::Triangle,
                1,
                Vec3::new(2.0, 0.5, 0.0),
                1.0,
                0.0,
                frame_count,
            ),
            RenderItem::new(
                "spinner",
                Geometry::Triangle,
                2,
                Vec3::new(0.0, 1.0, 0.0),
                1.5,
                1.2,
                frame_count,
            ),
            RenderItem::new(
                "wave",
                Geometry::Wave,
                3,
                Vec3::new(0.0, -1.0, 0.0),
                3.0,
                0.0,
                frame_count,
            ),
        ];
        let mut world = Self {
            items,
            pass: bytemuck::Zeroable::zeroed(),
            wave: vec![bytemuck::Zeroable::zeroed(); WAVE_VERTEX_COUNT],
            aspect_ratio: 1.0,
            eye: Vec3::new(0.0, 2.5, -7.0),
        };
        world.set_render_target_size(width, height);
        world
    }

    pub fn object_count(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[RenderItem] {
        &self.items
    }

    pub fn pass(&self) -> &PassConstants {
        &self.pass
    }

    pub fn set_render_target_size(&mut self, width: u32, height: u32) {
        self.aspect_ratio = width as f32 / height.max(1) as f32;
        self.pass.render_target_size = [width as f32, height as f32];
    }

    pub fn update(&mut self, time: FrameTime) {
        for item in &mut self.items {
            if item.spin != 0.0 {
                item.world = Mat4::from_scale_rotation_translation(
                    Vec3::splat(item.scale),
                    Quat::from_rotation_y(item.spin * time.total),
                    item.translation,
                );
                item.dirty.mark();
            }
        }

        let view = Mat4::look_at_lh(self.eye, Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_lh(std::f32::consts::FRAC_PI_4, self.aspect_ratio, 0.1, 100.0);
        self.pass.view_proj = (proj * view).to_cols_array_2d();
        self.pass.total_time = time.total;
        self.pass.delta_time = time.delta;

        update_wave(&mut self.wave, time.total);
    }

    /// Writes this frame's data into `frame`. Object constants are only copied
    /// for items the slot does not already hold. Returns how many were copied.
    pub fn upload<B: UploadBuffer>(&mut self, frame: &mut ShapesFrame<B>) -> GpuResult<usize> {
        let mut copied = 0;
        for item in &mut self.items {
            if item.dirty.take() {
                let constants = ObjectConstants {
                    world: item.world.to_cols_array_2d(),
                };
                frame
                    .constants
                    .objects
                    .copy_data(item.object_index, &constants)?;
                copied += 1;
            }
        }
        frame.constants.pass.copy_data(0, &self.pass)?;
        frame.vertices.copy_slice(&self.wave)?;
        Ok(copied)
    }
}

fn update_wave(wave: &mut [Vertex], total_time: f32) {
    for column in 0..WAVE_COLUMNS {
        let u = column as f32 / (WAVE_COLUMNS - 1) as f32;
        let x = u * 2.0 - 1.0;
        let height = 0.08 * (x * 9.0 + total_time * 2.5).sin();
        let shade = 0.5 + height * 4.0;
        let color = [0.1, 0.3 + shade * 0.4, 0.6 + shade * 0.3, 1.0];
        wave[column * 2] = Vertex {
            position: [x, height, 0.25],
            color,
        };
        wave[column * 2 + 1] = Vertex {
            position: [x, height, -0.25],
            color,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_ring::headless::HeadlessDevice;

    #[test]
    fn constant_layouts_match_the_shader() {
        assert_eq!(size_of::<ObjectConstants>(), 64);
        assert_eq!(size_of::<PassConstants>(), 80);
        assert_eq!(size_of::<Vertex>(), 28);
    }

    #[test]
    fn static_items_stop_uploading_after_every_slot_has_them() {
        let device = HeadlessDevice::new();
        let mut world = ShapesWorld::new(3, 800, 600);
        let mut frame = ShapesFrame::new(&device, 1, world.object_count(), WAVE_VERTEX_COUNT)
            .unwrap();

        let time = FrameTime {
            delta: 0.016,
            total: 0.5,
        };
        let mut copies = Vec::new();
        for _ in 0..5 {
            world.update(time);
            copies.push(world.upload(&mut frame).unwrap());
        }
        // Every item for three frames, then only the spinner.
        assert_eq!(copies, vec![4, 4, 4, 1, 1]);
    }

    #[test]
    fn wave_moves_with_time() {
        let mut world = ShapesWorld::new(3, 800, 600);
        world.update(FrameTime {
            delta: 0.0,
            total: 0.0,
        });
        let before = world.wave[10];
        world.update(FrameTime {
            delta: 0.1,
            total: 0.1,
        });
        let after = world.wave[10];
        assert_eq!(before.position[0], after.position[0]);
        assert_ne!(before.position[1], after.position[1]);
    }

    #[test]
    fn settings_keys_toggle_independently() {
        let mut settings = RenderSettings::default();
        assert_eq!(settings.apply_key(Key::Other(0x41)), None);
        assert_eq!(
            settings.apply_key(WIREFRAME_KEY),
            Some(SettingsChange::FillMode)
        );
        assert_eq!(
            settings.apply_key(MULTISAMPLE_KEY),
            Some(SettingsChange::Multisampling)
        );
        assert_eq!(settings.sample_count(), 4);
        assert_eq!(settings.pipeline_label(), "opaque_wireframe_msaa");

        settings.apply_key(WIREFRAME_KEY);
        assert_eq!(settings.pipeline_label(), "opaque_msaa");
    }

    #[test]
    fn resize_updates_the_pass_constants() {
        let mut world = ShapesWorld::new(3, 800, 600);
        world.set_render_target_size(1920, 1080);
        assert_eq!(world.pass().render_target_size, [1920.0, 1080.0]);
    }
}
