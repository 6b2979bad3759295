//! OpenGL quad renderer
//!
//! Draws each tracked window as a textured quad on the composite overlay.
//! Texture contents come straight from the window's GLX pixmap: the
//! binding is attached for the draw and detached right after (strict
//! binding), so the quad always samples the window's live contents.

use std::ffi::CString;
use std::ptr;

use anyhow::{anyhow, Result};
use tracing::warn;

use crate::registry::TextureId;
use crate::x11::glx::GlxInterop;

const VERTEX_SHADER: &str = r#"
    #version 330 core
    layout (location = 0) in vec2 aPos;
    layout (location = 1) in vec2 aTexCoord;

    uniform vec2 uPosition;
    uniform vec2 uSize;

    out vec2 TexCoord;

    void main() {
        vec2 pos = aPos * uSize + uPosition;
        gl_Position = vec4(pos.x, pos.y, 0.0, 1.0);
        TexCoord = aTexCoord;
    }
"#;

const FRAGMENT_SHADER: &str = r#"
    #version 330 core
    out vec4 FragColor;

    in vec2 TexCoord;

    uniform sampler2D uTexture;
    uniform float uOpacity;

    void main() {
        vec4 texColor = texture(uTexture, TexCoord);
        FragColor = vec4(texColor.rgb, texColor.a * uOpacity);
    }
"#;

pub struct QuadRenderer {
    program: u32,
    vao: u32,
    vbo: u32,
    /// Scratch texture object the GLX pixmap is bound into per draw.
    texture: u32,
}

impl QuadRenderer {
    pub fn new() -> Result<Self> {
        unsafe {
            gl::Enable(gl::BLEND);
            gl::BlendFunc(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA);

            let program = create_program()?;

            let mut vao = 0;
            let mut vbo = 0;
            gl::GenVertexArrays(1, &mut vao);
            gl::GenBuffers(1, &mut vbo);
            gl::BindVertexArray(vao);
            gl::BindBuffer(gl::ARRAY_BUFFER, vbo);

            let stride = 4 * std::mem::size_of::<f32>() as i32;
            gl::VertexAttribPointer(0, 2, gl::FLOAT, gl::FALSE, stride, ptr::null());
            gl::EnableVertexAttribArray(0);
            gl::VertexAttribPointer(
                1,
                2,
                gl::FLOAT,
                gl::FALSE,
                stride,
                (2 * std::mem::size_of::<f32>()) as *const _,
            );
            gl::EnableVertexAttribArray(1);
            gl::BindVertexArray(0);

            let mut texture = 0;
            gl::GenTextures(1, &mut texture);
            gl::BindTexture(gl::TEXTURE_2D, texture);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);
            gl::BindTexture(gl::TEXTURE_2D, 0);

            Ok(Self {
                program,
                vao,
                vbo,
                texture,
            })
        }
    }

    pub fn viewport(&self, width: u16, height: u16) {
        unsafe {
            gl::Viewport(0, 0, width as i32, height as i32);
        }
    }

    pub fn clear(&self, r: f32, g: f32, b: f32) {
        unsafe {
            gl::ClearColor(r, g, b, 1.0);
            gl::Clear(gl::COLOR_BUFFER_BIT);
        }
    }

    /// Draw one window quad, sampling its GLX pixmap.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_window(
        &self,
        glx: &GlxInterop,
        texture: TextureId,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        screen_width: f32,
        screen_height: f32,
        opacity: f32,
    ) {
        unsafe {
            gl::UseProgram(self.program);

            // X11 top-left origin to normalized GL coordinates.
            let x_gl = (x / screen_width) * 2.0 - 1.0;
            let y_gl = 1.0 - ((y + height) / screen_height) * 2.0;
            let width_gl = (width / screen_width) * 2.0;
            let height_gl = (height / screen_height) * 2.0;

            let pos_loc = gl::GetUniformLocation(self.program, b"uPosition\0".as_ptr() as *const _);
            let size_loc = gl::GetUniformLocation(self.program, b"uSize\0".as_ptr() as *const _);
            let opacity_loc =
                gl::GetUniformLocation(self.program, b"uOpacity\0".as_ptr() as *const _);
            let tex_loc = gl::GetUniformLocation(self.program, b"uTexture\0".as_ptr() as *const _);

            gl::Uniform2f(pos_loc, x_gl, y_gl);
            gl::Uniform2f(size_loc, width_gl, height_gl);
            gl::Uniform1f(opacity_loc, opacity);
            gl::Uniform1i(tex_loc, 0);

            gl::ActiveTexture(gl::TEXTURE0);
            gl::BindTexture(gl::TEXTURE_2D, self.texture);
            glx.bind_tex_image(texture);

            gl::BindVertexArray(self.vao);
            let vertices: [f32; 16] = [
                0.0, 0.0, 0.0, 1.0,
                1.0, 0.0, 1.0, 1.0,
                1.0, 1.0, 1.0, 0.0,
                0.0, 1.0, 0.0, 0.0,
            ];
            gl::BindBuffer(gl::ARRAY_BUFFER, self.vbo);
            gl::BufferData(
                gl::ARRAY_BUFFER,
                (vertices.len() * std::mem::size_of::<f32>()) as isize,
                vertices.as_ptr() as *const _,
                gl::DYNAMIC_DRAW,
            );
            gl::DrawArrays(gl::TRIANGLE_FAN, 0, 4);

            glx.release_tex_image(texture);
            gl::BindVertexArray(0);
            gl::BindTexture(gl::TEXTURE_2D, 0);

            let err = gl::GetError();
            if err != gl::NO_ERROR {
                warn!("OpenGL error after drawing window quad: 0x{:x}", err);
            }
        }
    }
}

impl Drop for QuadRenderer {
    fn drop(&mut self) {
        unsafe {
            gl::DeleteTextures(1, &self.texture);
            gl::DeleteBuffers(1, &self.vbo);
            gl::DeleteVertexArrays(1, &self.vao);
            gl::DeleteProgram(self.program);
        }
    }
}

fn create_program() -> Result<u32> {
    unsafe {
        let vs = compile_shader(VERTEX_SHADER, gl::VERTEX_SHADER)?;
        let fs = compile_shader(FRAGMENT_SHADER, gl::FRAGMENT_SHADER)?;
        let program = gl::CreateProgram();
        gl::AttachShader(program, vs);
        gl::AttachShader(program, fs);
        gl::LinkProgram(program);
        gl::DeleteShader(vs);
        gl::DeleteShader(fs);

        let mut success = 0;
        gl::GetProgramiv(program, gl::LINK_STATUS, &mut success);
        if success == 0 {
            let mut len = 0;
            gl::GetProgramiv(program, gl::INFO_LOG_LENGTH, &mut len);
            let mut buffer = vec![0u8; len as usize];
            gl::GetProgramInfoLog(program, len, ptr::null_mut(), buffer.as_mut_ptr() as *mut _);
            let log = String::from_utf8_lossy(&buffer);
            gl::DeleteProgram(program);
            return Err(anyhow!("Program linking failed: {}", log));
        }
        Ok(program)
    }
}

fn compile_shader(source: &str, shader_type: u32) -> Result<u32> {
    unsafe {
        let shader = gl::CreateShader(shader_type);
        let c_str = CString::new(source)?;
        gl::ShaderSource(shader, 1, &c_str.as_ptr(), ptr::null());
        gl::CompileShader(shader);

        let mut success = 0;
        gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut success);
        if success == 0 {
            let mut len = 0;
            gl::GetShaderiv(shader, gl::INFO_LOG_LENGTH, &mut len);
            let mut buffer = vec![0u8; len as usize];
            gl::GetShaderInfoLog(shader, len, ptr::null_mut(), buffer.as_mut_ptr() as *mut _);
            let log = String::from_utf8_lossy(&buffer);
            gl::DeleteShader(shader);
            return Err(anyhow!("Shader compilation failed: {}", log));
        }
        Ok(shader)
    }
}
