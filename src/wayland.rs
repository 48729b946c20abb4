use anyhow::{Context, Result};
use smithay_client_toolkit::{
    compositor::{CompositorHandler, CompositorState},
    delegate_compositor, delegate_layer, delegate_output, delegate_pointer, delegate_registry,
    delegate_seat, delegate_shm,
    output::{OutputHandler, OutputState},
    reexports::{calloop::EventLoop, calloop_wayland_source::WaylandSource},
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    seat::pointer::{PointerEvent, PointerEventKind, PointerHandler},
    seat::{Capability as SeatCapability, SeatHandler, SeatState},
    shell::wlr_layer::{
        Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
        LayerSurfaceConfigure,
    },
    shell::WaylandSurface,
    shm::{slot::SlotPool, Shm, ShmHandler},
};
use wayland_client::{
    globals::registry_queue_init,
    protocol::{wl_output, wl_pointer, wl_seat, wl_shm, wl_surface},
    Connection, QueueHandle,
};

use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::canvas::{Canvas, FontState};
use crate::config::{self, TlpCareConfig, WindowConfig};
use crate::elevated::ProcessRunner;
use crate::ipc::{self, IpcCommand, IpcResponse, StateReport};
use crate::notify::DesktopNotifier;
use crate::renderer::{self, Hit, Layout, MenuRow, PanelState};
use crate::scheduler::PeriodicTask;
use crate::status::TlpStatusSource;
use crate::widget::{ElevatedActions, PanelModel, Slider, StatusWidget};

const BTN_LEFT: u32 = 0x110;

pub struct TlpCare {
    registry_state: RegistryState,
    seat_state: SeatState,
    output_state: OutputState,
    compositor_state: CompositorState,
    layer_shell: LayerShell,
    shm: Shm,
    pool: SlotPool,
    qh: QueueHandle<TlpCare>,

    layer_surface: LayerSurface,
    width: u32,
    height: u32,
    configured: bool,
    needs_redraw: bool,

    config: TlpCareConfig,
    config_path: PathBuf,
    font: FontState,

    widget: StatusWidget<PanelModel>,
    layout: Layout,
    menu_open: bool,
    hover: Option<MenuRow>,
    dragging: Option<Slider>,
    pointer: Option<wl_pointer::WlPointer>,

    ipc_listener: UnixListener,
    ipc_socket_path: PathBuf,

    reschedule: Option<Duration>,
    should_quit: bool,
}

pub fn build_widget(config: &TlpCareConfig) -> StatusWidget<PanelModel> {
    StatusWidget::new(
        Box::new(TlpStatusSource::from_config(&config.tlp)),
        PanelModel::default(),
        Box::new(DesktopNotifier::default()),
        Box::new(ProcessRunner::new()),
        ElevatedActions::from_config(&config.tlp),
        config.thresholds.positions(),
    )
}

fn parse_layer(layer: &str) -> Layer {
    match layer {
        "background" => Layer::Background,
        "bottom" => Layer::Bottom,
        "overlay" => Layer::Overlay,
        _ => Layer::Top,
    }
}

fn parse_anchor(anchor: &str) -> Anchor {
    let mut parsed = Anchor::empty();
    for part in anchor.split_whitespace() {
        match part.to_lowercase().as_str() {
            "top" => parsed |= Anchor::TOP,
            "bottom" => parsed |= Anchor::BOTTOM,
            "left" => parsed |= Anchor::LEFT,
            "right" => parsed |= Anchor::RIGHT,
            other => log::warn!("Ignoring unknown anchor edge '{}'", other),
        }
    }
    parsed
}

fn compute_layout(widget: &StatusWidget<PanelModel>, font: &FontState, font_size: f32, menu_open: bool) -> Layout {
    Layout::compute(widget.view(), font_size, menu_open, &|text, size| font.measure_text(text, size))
}

fn configure_layer_surface(surface: &LayerSurface, window: &WindowConfig, width: u32, height: u32) {
    surface.set_size(width, height);
    surface.set_anchor(parse_anchor(&window.anchor));
    surface.set_margin(window.margin_top, window.margin_right, window.margin_bottom, window.margin_left);
    surface.set_exclusive_zone(0);
    surface.set_keyboard_interactivity(KeyboardInteractivity::None);
    surface.commit();
}

pub fn run(config: TlpCareConfig, config_path: PathBuf, socket_override: Option<PathBuf>) -> Result<()> {
    let conn = Connection::connect_to_env().context(
        "Failed to connect to Wayland. Ensure a Wayland compositor with wlr-layer-shell support is running."
    )?;

    let (globals, mut event_queue) = registry_queue_init(&conn)
        .context("Failed to initialize Wayland registry")?;
    let qh = event_queue.handle();

    let compositor = CompositorState::bind(&globals, &qh)
        .context("wl_compositor not available")?;
    let layer_shell = LayerShell::bind(&globals, &qh)
        .context("wlr-layer-shell not available. Your compositor must support the wlr_layer_shell_v1 protocol.")?;
    let shm = Shm::bind(&globals, &qh)
        .context("wl_shm not available")?;

    let font = FontState::load(&config.theme.font)?;
    let widget = build_widget(&config);
    let layout = compute_layout(&widget, &font, config.theme.font_size, false);

    let surface = compositor.create_surface(&qh);
    let layer_surface = layer_shell.create_layer_surface(
        &qh, surface, parse_layer(&config.window.layer), Some("tlpcare"), None,
    );
    configure_layer_surface(&layer_surface, &config.window, layout.width, layout.height);

    let pool = SlotPool::new((layout.width * layout.height * 4) as usize, &shm)
        .context("Failed to create SHM pool")?;

    let ipc_socket_path = ipc::socket_path(socket_override.as_ref());
    let ipc_listener = ipc::create_listener(&ipc_socket_path)?;

    let mut app = TlpCare {
        registry_state: RegistryState::new(&globals),
        seat_state: SeatState::new(&globals, &qh),
        output_state: OutputState::new(&globals, &qh),
        compositor_state: compositor,
        layer_shell,
        shm,
        pool,
        qh: qh.clone(),
        layer_surface,
        width: layout.width,
        height: layout.height,
        configured: false,
        needs_redraw: true,
        config,
        config_path,
        font,
        widget,
        layout,
        menu_open: false,
        hover: None,
        dragging: None,
        pointer: None,
        ipc_listener,
        ipc_socket_path,
        reschedule: None,
        should_quit: false,
    };

    // Outputs are only known after the first roundtrip.
    event_queue.roundtrip(&mut app)?;
    if let Some(name) = app.config.window.output.clone() {
        app.move_to_output(&name);
    }

    let mut event_loop: EventLoop<TlpCare> = EventLoop::try_new()
        .context("Failed to create event loop")?;
    WaylandSource::new(conn.clone(), event_queue)
        .insert(event_loop.handle())
        .map_err(|e| anyhow::anyhow!("Failed to register Wayland source: {}", e.error))?;

    let interval = app.config.tlp.poll_interval();
    let mut poller = PeriodicTask::start(&event_loop.handle(), interval, TlpCare::tick)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let r = running.clone();
        ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
        }).context("Failed to set signal handler")?;
    }

    log::info!("Polling TLP status every {:?}", interval);

    while !app.should_quit && running.load(Ordering::SeqCst) {
        event_loop
            .dispatch(Some(Duration::from_millis(100)), &mut app)
            .context("Event loop dispatch failed")?;

        app.poll_ipc();

        if let Some(interval) = app.reschedule.take() {
            poller.cancel();
            poller = PeriodicTask::start(&event_loop.handle(), interval, TlpCare::tick)?;
            log::info!("Polling interval changed to {:?}", interval);
        }

        if app.configured && app.needs_redraw {
            app.draw();
            app.needs_redraw = false;
        }
    }

    poller.cancel();
    if poller.skipped() > 0 {
        log::debug!("Skipped {} overlapping ticks", poller.skipped());
    }
    ipc::cleanup_socket(&app.ipc_socket_path);

    Ok(())
}

impl TlpCare {
    fn tick(&mut self) {
        self.widget.tick();
        self.sync_view();
    }

    /// Pick up anything the widget pushed to its view since the last frame.
    fn sync_view(&mut self) {
        if self.widget.view_mut().take_dirty() {
            self.relayout();
        }
    }

    /// Recompute the layout and resize the surface if the content size changed.
    fn relayout(&mut self) {
        let layout = compute_layout(&self.widget, &self.font, self.config.theme.font_size, self.menu_open);
        if layout.width != self.width || layout.height != self.height {
            self.width = layout.width;
            self.height = layout.height;
            self.layer_surface.set_size(self.width, self.height);
            self.layer_surface.wl_surface().commit();
        }
        self.layout = layout;
        self.needs_redraw = true;
    }

    fn set_menu(&mut self, open: bool) {
        if self.menu_open != open {
            self.menu_open = open;
            self.hover = None;
            self.dragging = None;
            self.relayout();
        }
    }

    fn set_hover(&mut self, hover: Option<MenuRow>) {
        if self.hover != hover {
            self.hover = hover;
            self.needs_redraw = true;
        }
    }

    fn handle_press(&mut self, x: f32, y: f32) {
        match self.layout.hit(x, y) {
            Some(Hit::Bar) => self.set_menu(!self.menu_open),
            Some(Hit::Slider(slider, position)) => {
                self.dragging = Some(slider);
                self.widget.set_slider(slider, position);
            }
            Some(Hit::SetThreshold) => {
                self.widget.on_set_threshold_activated();
                self.set_menu(false);
            }
            Some(Hit::FullCharge) => {
                self.widget.on_full_charge_activated();
                self.set_menu(false);
            }
            None => {}
        }
    }

    fn get_output_name(&self, output: &wl_output::WlOutput) -> Option<String> {
        self.output_state.info(output).and_then(|info| info.name.clone())
    }

    fn find_output_by_name(&self, name: &str) -> Option<wl_output::WlOutput> {
        self.output_state
            .outputs()
            .find(|output| self.get_output_name(output).as_deref() == Some(name))
    }

    fn move_to_output(&mut self, name: &str) {
        match self.find_output_by_name(name) {
            Some(target) => {
                log::info!("Moving to configured output: {}", name);
                self.recreate_surface(Some(&target));
            }
            None => log::warn!("Configured output '{}' not found, staying on default", name),
        }
    }

    fn recreate_surface(&mut self, target_output: Option<&wl_output::WlOutput>) {
        let surface = self.compositor_state.create_surface(&self.qh);
        let layer_surface = self.layer_shell.create_layer_surface(
            &self.qh, surface, parse_layer(&self.config.window.layer), Some("tlpcare"), target_output,
        );
        configure_layer_surface(&layer_surface, &self.config.window, self.width, self.height);

        // Dropping the old surface destroys it.
        self.layer_surface = layer_surface;
        self.configured = false;
        self.needs_redraw = true;
    }

    fn draw(&mut self) {
        let width = self.width;
        let height = self.height;
        if width == 0 || height == 0 { return; }

        let stride = width as i32 * 4;
        let buf_size = (stride * height as i32) as usize;
        if self.pool.len() < buf_size {
            if let Err(e) = self.pool.resize(buf_size) {
                log::warn!("Failed to resize SHM pool: {}", e);
                return;
            }
        }

        let (buffer, canvas_data) = match self.pool.create_buffer(width as i32, height as i32, stride, wl_shm::Format::Argb8888) {
            Ok(buffer) => buffer,
            Err(e) => {
                log::warn!("Failed to create buffer: {}", e);
                return;
            }
        };

        let Some(mut canvas) = Canvas::new(width, height) else { return };
        let state = PanelState {
            model: self.widget.view(),
            theme: &self.config.theme,
            layout: &self.layout,
            hover: self.hover,
        };
        renderer::render(&mut canvas, &state, &self.font);
        canvas.apply_opacity(self.config.window.opacity);
        canvas.write_argb8888(canvas_data);

        let surface = self.layer_surface.wl_surface();
        if let Err(e) = buffer.attach_to(surface) {
            log::warn!("Failed to attach buffer: {}", e);
            return;
        }
        surface.damage_buffer(0, 0, width as i32, height as i32);
        surface.frame(&self.qh, surface.clone());
        surface.commit();
    }

    fn poll_ipc(&mut self) {
        loop {
            match self.ipc_listener.accept() {
                Ok((stream, _)) => self.handle_ipc_connection(stream),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("IPC accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_ipc_connection(&mut self, stream: std::os::unix::net::UnixStream) {
        // The listener is non-blocking; a client gets a short window to send its line.
        if let Err(e) = stream.set_nonblocking(false)
            .and_then(|_| stream.set_read_timeout(Some(Duration::from_secs(1))))
        {
            log::warn!("IPC socket setup failed: {}", e);
            return;
        }

        let cmd = match ipc::read_command(&stream) {
            Ok(cmd) => cmd,
            Err(e) => {
                log::warn!("IPC read error: {}", e);
                let mut stream = stream;
                let _ = ipc::write_response(&mut stream, &IpcResponse::err(format!("Bad command: {}", e)));
                return;
            }
        };

        log::debug!("IPC command: {:?}", cmd);
        let response = self.handle_command(cmd);
        self.sync_view();

        let mut stream = stream;
        if let Err(e) = ipc::write_response(&mut stream, &response) {
            log::warn!("IPC write error: {}", e);
        }
    }

    fn handle_command(&mut self, cmd: IpcCommand) -> IpcResponse {
        if let Some(response) = ipc::dispatch_widget_command(&mut self.widget, &cmd) {
            return response;
        }
        match cmd {
            IpcCommand::GetState => {
                IpcResponse::state(StateReport::from_widget(&self.widget, self.menu_open, &self.config_path))
            }
            IpcCommand::SetMenu { open } => {
                self.set_menu(open);
                IpcResponse::ok()
            }
            IpcCommand::ToggleMenu => {
                self.set_menu(!self.menu_open);
                IpcResponse::ok()
            }
            IpcCommand::ReloadConfig => match config::load_config(&self.config_path) {
                Ok(new_config) => {
                    self.apply_config(new_config);
                    IpcResponse::ok()
                }
                Err(e) => IpcResponse::err(format!("Config reload failed: {:#}", e)),
            },
            IpcCommand::Quit => {
                self.should_quit = true;
                IpcResponse::ok()
            }
            _ => IpcResponse::err("Unhandled command"),
        }
    }

    /// Apply a reloaded config. Slider positions are UI state and survive.
    fn apply_config(&mut self, new_config: TlpCareConfig) {
        if new_config.theme.font != self.config.theme.font {
            match FontState::load(&new_config.theme.font) {
                Ok(font) => self.font = font,
                Err(e) => log::warn!("Keeping previous font: {:#}", e),
            }
        }

        if new_config.tlp.poll_interval_ms != self.config.tlp.poll_interval_ms {
            self.reschedule = Some(new_config.tlp.poll_interval());
        }

        let window = &new_config.window;
        self.layer_surface.set_anchor(parse_anchor(&window.anchor));
        self.layer_surface.set_margin(window.margin_top, window.margin_right, window.margin_bottom, window.margin_left);
        if window.layer != self.config.window.layer {
            self.layer_surface.set_layer(parse_layer(&window.layer));
        }

        self.widget.reconfigure(
            Box::new(TlpStatusSource::from_config(&new_config.tlp)),
            ElevatedActions::from_config(&new_config.tlp),
        );
        self.config = new_config;
        self.relayout();
        self.layer_surface.wl_surface().commit();
        log::info!("Reloaded config from {}", self.config_path.display());
    }
}

// SCTK handler implementations

impl CompositorHandler for TlpCare {
    fn scale_factor_changed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _surface: &wl_surface::WlSurface, _new_factor: i32) {
        self.needs_redraw = true;
    }

    fn transform_changed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _surface: &wl_surface::WlSurface, _new_transform: wl_output::Transform) {
        self.needs_redraw = true;
    }

    fn frame(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _surface: &wl_surface::WlSurface, _time: u32) {}

    fn surface_enter(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _surface: &wl_surface::WlSurface, output: &wl_output::WlOutput) {
        log::info!("Surface entered output: {:?}", self.get_output_name(output));
    }

    fn surface_leave(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _surface: &wl_surface::WlSurface, _output: &wl_output::WlOutput) {}
}

impl LayerShellHandler for TlpCare {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _layer: &LayerSurface) {
        self.should_quit = true;
    }

    fn configure(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _layer: &LayerSurface, configure: LayerSurfaceConfigure, _serial: u32) {
        if configure.new_size.0 > 0 {
            self.width = configure.new_size.0;
        }
        if configure.new_size.1 > 0 {
            self.height = configure.new_size.1;
        }
        self.configured = true;
        self.needs_redraw = true;
    }
}

impl OutputHandler for TlpCare {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _output: wl_output::WlOutput) {}
    fn update_output(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _output: wl_output::WlOutput) {}
    fn output_destroyed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _output: wl_output::WlOutput) {}
}

impl SeatHandler for TlpCare {
    fn seat_state(&mut self) -> &mut SeatState {
        &mut self.seat_state
    }

    fn new_seat(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat) {}

    fn new_capability(&mut self, _conn: &Connection, qh: &QueueHandle<Self>, seat: wl_seat::WlSeat, capability: SeatCapability) {
        if capability == SeatCapability::Pointer && self.pointer.is_none() {
            match self.seat_state.get_pointer(qh, &seat) {
                Ok(pointer) => self.pointer = Some(pointer),
                Err(e) => log::warn!("Failed to get pointer: {}", e),
            }
        }
    }

    fn remove_capability(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat, capability: SeatCapability) {
        if capability == SeatCapability::Pointer {
            if let Some(pointer) = self.pointer.take() {
                pointer.release();
            }
        }
    }

    fn remove_seat(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat) {}
}

impl ShmHandler for TlpCare {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.shm
    }
}

impl ProvidesRegistryState for TlpCare {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState, SeatState];
}

impl PointerHandler for TlpCare {
    fn pointer_frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _pointer: &wl_pointer::WlPointer,
        events: &[PointerEvent],
    ) {
        for event in events {
            let (x, y) = (event.position.0 as f32, event.position.1 as f32);
            match event.kind {
                PointerEventKind::Enter { .. } | PointerEventKind::Motion { .. } => {
                    if let Some(slider) = self.dragging {
                        if let Some(position) = self.layout.slider_position(slider, x) {
                            self.widget.set_slider(slider, position);
                        }
                    }
                    let hover = self.layout.row_at(x, y);
                    self.set_hover(hover);
                }
                PointerEventKind::Leave { .. } => {
                    self.dragging = None;
                    self.set_hover(None);
                }
                PointerEventKind::Press { button, .. } if button == BTN_LEFT => self.handle_press(x, y),
                PointerEventKind::Release { button, .. } if button == BTN_LEFT => self.dragging = None,
                _ => {}
            }
        }
        self.sync_view();
    }
}

delegate_compositor!(TlpCare);
delegate_layer!(TlpCare);
delegate_output!(TlpCare);
delegate_pointer!(TlpCare);
delegate_registry!(TlpCare);
delegate_seat!(TlpCare);
delegate_shm!(TlpCare);
