fn main() {
    ppupdater::run()
}
